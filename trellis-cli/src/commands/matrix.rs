use crate::commands::load_definition;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use trellis_service::{MatrixExpander, MatrixFilter};

/// List the jobs a pipeline expands to
#[derive(Args, Debug)]
pub struct MatrixArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// List only jobs with this label (format: dimension=label)
    #[arg(long, value_name = "DIMENSION=LABEL")]
    pub only: Vec<MatrixFilter>,

    /// Also print each job's variables
    #[arg(long)]
    pub variables: bool,
}

pub fn execute(args: MatrixArgs) -> Result<()> {
    let definition = load_definition(&args.pipeline)?;
    let jobs = MatrixExpander::expand_definition(&definition, &args.only)?;

    let width = jobs.len().to_string().len();
    for job in &jobs {
        println!("{:>width$}  {}", job.index, job.identity, width = width);
        if args.variables {
            for (name, value) in &job.variables {
                output::dim(&format!("{:>width$}    {} = {}", "", name, value, width = width));
            }
        }
    }

    println!();
    output::dim(&format!("  {} job(s) total", jobs.len()));

    Ok(())
}
