use crate::commands::load_definition;
use crate::output;

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use color_eyre::Result;

use trellis_service::parser::models::{JobStatus, StepStatus};
use trellis_service::{
    progress_channel, ExecutionEvent, ExecutionPlan, MatrixFilter, Orchestrator,
    OrchestratorConfig, ReportFormat, TestReporter,
};

/// Expand the matrix and run every job
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Run only jobs with this label (can be repeated, format: dimension=label)
    #[arg(long, value_name = "DIMENSION=LABEL")]
    pub only: Vec<MatrixFilter>,

    /// Stop starting new jobs after the first failed job
    #[arg(long)]
    pub fail_fast: bool,

    /// Maximum number of jobs running at once
    #[arg(long, value_name = "N", value_parser = parse_parallelism)]
    pub max_parallel: Option<usize>,

    /// Write a structured report to this file
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Report file format: junit, json, tap
    #[arg(long, value_name = "FORMAT", default_value = "junit")]
    pub report_format: ReportFormat,

    /// Default step timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,

    /// Working directory for execution
    #[arg(long, short = 'w', value_name = "DIR")]
    pub working_dir: Option<PathBuf>,
}

fn parse_parallelism(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let definition = load_definition(&args.pipeline)?;

    // Every configuration error surfaces here, before any process starts
    let plan = ExecutionPlan::build(&definition, &args.only)?;

    output::info(&format!(
        "Pipeline '{}': {} jobs, {} steps",
        plan.name,
        plan.jobs.len(),
        plan.steps.len()
    ));

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let mut config = OrchestratorConfig::default().with_working_dir(working_dir);
    if args.fail_fast {
        config = config.with_fail_fast(true);
    }
    if let Some(n) = args.max_parallel {
        config = config.with_max_parallel(n);
    }
    if let Some(secs) = args.timeout {
        config = config.with_step_timeout(Duration::from_secs(secs));
    }

    let (tx, mut rx) = progress_channel();
    let orchestrator = Orchestrator::new(config).with_progress(tx);

    // Ctrl-C cancels the run; running steps are killed and recorded as canceled
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output::warning("Interrupted, canceling running jobs");
            token.cancel();
        }
    });

    // Spawn execution in background
    let exec_handle = tokio::spawn(async move { orchestrator.execute(plan).await });

    // Process events in the foreground
    while let Some(event) = rx.recv().await {
        render_event(&event);
    }

    let result = exec_handle.await?;

    print!("{}", TestReporter::to_terminal(&result.report));

    if let Some(path) = &args.report {
        TestReporter::write(&result.report, args.report_format, path)?;
        output::status(
            "Report",
            &format!("{} ({})", path.display(), args.report_format),
        );
    }

    if !result.status.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

fn render_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            pipeline_name,
            total_jobs,
            max_parallel,
        } => {
            println!();
            output::header(&format!(
                "Pipeline '{}' ({} jobs, up to {} at once)",
                pipeline_name, total_jobs, max_parallel
            ));
        }

        ExecutionEvent::RunCompleted {
            status, duration, ..
        } => {
            println!();
            if status.is_success() {
                output::success(&format!(
                    "Run completed successfully in {:.2}s",
                    duration.as_secs_f64()
                ));
            } else {
                output::failure(&format!("Run failed after {:.2}s", duration.as_secs_f64()));
            }
        }

        ExecutionEvent::JobStarted {
            job, total_steps, ..
        } => {
            println!("[{}] started ({} steps)", job, total_steps);
        }

        ExecutionEvent::JobCompleted {
            job,
            status,
            duration,
        } => {
            let line = format!(
                "[{}] {} ({:.2}s)",
                job,
                if *status == JobStatus::Succeeded {
                    "OK"
                } else {
                    "FAIL"
                },
                duration.as_secs_f64()
            );
            if *status == JobStatus::Succeeded {
                output::dim_success(&line);
            } else {
                output::dim_failure(&line);
            }
        }

        ExecutionEvent::JobSkipped { job, reason } => {
            output::warning(&format!("[{}] skipped: {}", job, reason));
        }

        ExecutionEvent::StepStarted {
            job,
            step_name,
            step_index,
        } => {
            println!("[{}] [Step {}] {}", job, step_index + 1, step_name);
        }

        ExecutionEvent::StepOutput {
            job,
            output: text,
            is_error,
            ..
        } => {
            for line in text.lines() {
                if *is_error {
                    output::step_error(job, line);
                } else {
                    output::step_output(job, line);
                }
            }
        }

        ExecutionEvent::StepCompleted {
            job,
            step_name,
            status,
            duration,
            exit_code,
            ..
        } => {
            let symbol = match status {
                StepStatus::Succeeded => "OK",
                StepStatus::Failed => "FAIL",
                StepStatus::TimedOut => "TIMEOUT",
                StepStatus::Canceled => "CANCELED",
                StepStatus::Skipped => "SKIP",
            };
            let exit_info = match exit_code {
                Some(code) if *code != 0 => format!(" (exit code: {})", code),
                _ => String::new(),
            };
            let line = format!(
                "[{}] {} {} ({:.2}s){}",
                job,
                step_name,
                symbol,
                duration.as_secs_f64(),
                exit_info,
            );
            if status.is_failure() {
                output::dim_failure(&line);
            } else {
                output::dim_success(&line);
            }
        }

        ExecutionEvent::StepSkipped {
            job,
            step_name,
            reason,
            ..
        } => {
            output::dim(&format!("[{}] {} skipped: {}", job, step_name, reason));
        }

        ExecutionEvent::ReportProblem {
            job,
            step_name,
            message,
        } => {
            output::warning(&format!(
                "[{}] could not read test results of '{}': {}",
                job, step_name, message
            ));
        }
    }
}
