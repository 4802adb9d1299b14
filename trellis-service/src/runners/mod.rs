// Runners Module
// The step runner seam and the environment handed to step processes

pub mod shell;

pub use shell::{Shell, ShellRunner};

use crate::execution::events::ProgressSender;
use crate::execution::matrix::JobConfig;
use crate::expression::substitute_macros;
use crate::parser::models::{Step, StepOutcome};

use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reserved variable holding the job identity
pub const ENV_JOB: &str = "TRELLIS_JOB";
/// Reserved variable holding the job index
pub const ENV_JOB_INDEX: &str = "TRELLIS_JOB_INDEX";
/// Reserved variable holding the step name
pub const ENV_STEP: &str = "TRELLIS_STEP";

/// Everything a runner needs to execute one step for one job
pub struct StepContext<'a> {
    pub job: &'a JobConfig,
    pub step: &'a Step,
    pub step_index: usize,
    /// Budget for the whole step, across all of its commands
    pub timeout: Duration,
    /// Base directory; relative step working directories resolve against it
    pub working_dir: &'a Path,
    pub cancel: &'a CancellationToken,
    pub events: &'a Option<ProgressSender>,
}

impl StepContext<'_> {
    /// Variables layered on top of the inherited process environment.
    ///
    /// Step `env` comes first, job variables override it and the reserved
    /// `TRELLIS_*` values override both.
    pub fn environment(&self) -> IndexMap<String, String> {
        let mut env = IndexMap::new();

        for (name, value) in &self.step.env {
            env.insert(name.clone(), substitute_macros(value, &self.job.variables));
        }
        for (name, value) in &self.job.variables {
            env.insert(name.clone(), value.clone());
        }

        env.insert(ENV_JOB.to_string(), self.job.identity.clone());
        env.insert(ENV_JOB_INDEX.to_string(), self.job.index.to_string());
        env.insert(ENV_STEP.to_string(), self.step.name.clone());
        env
    }

    /// Directory the step's commands run in
    pub fn resolve_working_dir(&self) -> PathBuf {
        match &self.step.working_directory {
            Some(dir) => self
                .working_dir
                .join(substitute_macros(dir, &self.job.variables)),
            None => self.working_dir.to_path_buf(),
        }
    }
}

/// Executes a step's commands and reports how it ended.
///
/// Implementations never return an error: every failure mode is a
/// `StepOutcome` status.
#[async_trait::async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, ctx: &StepContext<'_>) -> StepOutcome;
}
