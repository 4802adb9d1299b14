mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand};
use color_eyre::Result;

/// Run a matrix of CI jobs locally from a single pipeline definition
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand the matrix and run every job
    Run(commands::run::RunArgs),

    /// Check a pipeline definition without running anything
    Validate(commands::validate::ValidateArgs),

    /// List the jobs a pipeline expands to
    Matrix(commands::matrix::MatrixArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Validate(args) => commands::validate::execute(args),
        Command::Matrix(args) => commands::matrix::execute(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use trellis_service::ReportFormat;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "trellis",
            "run",
            "ci.yml",
            "--only",
            "platform=linux",
            "--only",
            "channel=beta",
            "--fail-fast",
            "--max-parallel",
            "2",
            "--report",
            "out.json",
            "--report-format",
            "json",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.only.len(), 2);
                assert_eq!(args.only[1].label, "beta");
                assert!(args.fail_fast);
                assert_eq!(args.max_parallel, Some(2));
                assert_eq!(args.report_format, ReportFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_filter() {
        let err = Cli::try_parse_from(["trellis", "matrix", "ci.yml", "--only", "linux"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_zero_parallelism() {
        let err = Cli::try_parse_from(["trellis", "run", "ci.yml", "--max-parallel", "0"]);
        assert!(err.is_err());
    }
}
