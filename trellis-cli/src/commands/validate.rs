use crate::commands::load_definition;
use crate::output;

use std::path::PathBuf;

use clap::Args;
use color_eyre::Result;

use trellis_service::{ExecutionPlan, MatrixExpander, MatrixFilter};

/// Check a pipeline definition without running anything
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Validate only the jobs with this label (format: dimension=label)
    #[arg(long, value_name = "DIMENSION=LABEL")]
    pub only: Vec<MatrixFilter>,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    // Step 1: Parse YAML and check structure
    let definition = match load_definition(&args.pipeline) {
        Ok(definition) => definition,
        Err(e) => {
            output::error(&format!("{}", e));
            std::process::exit(1);
        }
    };

    output::check("YAML syntax valid");

    let dimensions = MatrixExpander::dimensions(&definition);
    let variants: usize = dimensions.iter().map(|d| d.variants.len()).sum();
    output::check(&format!(
        "Structure: {} dimensions, {} variants, {} exclude rules, {} steps",
        dimensions.len(),
        variants,
        definition.exclude.len(),
        definition.steps.len()
    ));

    // Step 2: Expand the matrix and check conditions against every job
    match ExecutionPlan::build(&definition, &args.only) {
        Ok(plan) => {
            let conditions = plan.steps.iter().filter(|s| s.condition.is_some()).count();
            output::check(&format!("Matrix expands to {} jobs", plan.jobs.len()));
            output::check(&format!(
                "{} conditions checked against every job",
                conditions
            ));
        }
        Err(e) => {
            output::error(&format!("{}", e));
            std::process::exit(1);
        }
    }

    println!();
    output::success("Pipeline is valid");

    Ok(())
}
