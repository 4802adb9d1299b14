// Job Executor
// Runs one job's steps in order and derives its verdict

use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::matrix::JobConfig;
use crate::execution::plan::PreparedStep;
use crate::parser::models::{JobOutcome, JobStatus, StepOutcome, StepStatus};
use crate::runners::{StepContext, StepRunner};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason recorded on steps that follow an `on_success` failure
pub const SKIPPED_AFTER_FAILURE: &str = "skipped after earlier failure";

/// Reason recorded on steps the run cancellation cut off
pub const CUT_OFF_BY_CANCEL: &str = "run canceled before the step started";

/// Whether a step gets to run
enum Admission {
    Run,
    Skip(String),
    Cancel,
    Reject(String),
}

/// Executes the step list for a single job
pub struct JobExecutor {
    runner: Arc<dyn StepRunner>,
    working_dir: PathBuf,
    /// Timeout for steps that do not set their own
    default_timeout: Duration,
    event_tx: Option<ProgressSender>,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn StepRunner>, working_dir: PathBuf, default_timeout: Duration) -> Self {
        Self {
            runner,
            working_dir,
            default_timeout,
            event_tx: None,
        }
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Run every step of `steps` for `job`.
    ///
    /// The job is `Failed` iff a step with the `on_success` policy ran and
    /// failed, or cancellation cut the job short. Other outcomes of `always`
    /// steps are recorded but never change it.
    pub async fn execute(
        &self,
        job: &JobConfig,
        steps: &[PreparedStep],
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let start = Instant::now();

        info!(job = %job.identity, index = job.index, "job started");
        self.event_tx.send_event(ExecutionEvent::job_started(
            &job.identity,
            job.index,
            steps.len(),
        ));

        let mut outcomes = Vec::with_capacity(steps.len());
        let mut gate_closed = false;

        for (step_index, prepared) in steps.iter().enumerate() {
            let step = &prepared.step;

            let outcome = match self.admit(job, prepared, gate_closed, cancel) {
                Admission::Skip(reason) => {
                    debug!(job = %job.identity, step = %step.name, %reason, "step skipped");
                    self.event_tx.send_event(ExecutionEvent::step_skipped(
                        &job.identity,
                        &step.name,
                        step_index,
                        &reason,
                    ));
                    outcomes.push(StepOutcome::skipped(step, reason));
                    continue;
                }
                Admission::Cancel => {
                    debug!(job = %job.identity, step = %step.name, "step cut off by cancellation");
                    self.event_tx.send_event(ExecutionEvent::step_completed(
                        &job.identity,
                        &step.name,
                        step_index,
                        StepStatus::Canceled,
                        Duration::ZERO,
                        None,
                    ));
                    outcomes.push(StepOutcome::canceled(step, CUT_OFF_BY_CANCEL));
                    continue;
                }
                // Plan validation makes this unreachable for jobs it produced
                Admission::Reject(error) => StepOutcome::failed(step, error, Duration::ZERO),
                Admission::Run => self.run_step(job, prepared, step_index, cancel).await,
            };

            if outcome.status.is_failure() {
                warn!(
                    job = %job.identity,
                    step = %step.name,
                    status = ?outcome.status,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "step failed"
                );
                if step.policy.is_on_success() {
                    gate_closed = true;
                }
            }

            outcomes.push(outcome);
        }

        let status = Self::verdict(&outcomes);
        let duration = start.elapsed();

        info!(job = %job.identity, ?status, ?duration, "job finished");
        self.event_tx.send_event(ExecutionEvent::job_completed(
            &job.identity,
            status,
            duration,
        ));

        JobOutcome {
            identity: job.identity.clone(),
            index: job.index,
            variables: job.variables.clone(),
            status,
            steps: outcomes,
            duration,
            skip_reason: None,
            report_errors: Vec::new(),
        }
    }

    /// Failed iff a non-skipped `on_success` step failed or any step was
    /// canceled
    pub fn verdict(outcomes: &[StepOutcome]) -> JobStatus {
        let failed = outcomes.iter().any(|o| {
            o.status == StepStatus::Canceled
                || (o.policy.is_on_success() && o.status.is_failure())
        });
        if failed {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        }
    }

    fn admit(
        &self,
        job: &JobConfig,
        prepared: &PreparedStep,
        gate_closed: bool,
        cancel: &CancellationToken,
    ) -> Admission {
        let step = &prepared.step;

        if cancel.is_cancelled() {
            return Admission::Cancel;
        }

        if let Some(host) = step.host {
            if !host.matches_current() {
                return Admission::Skip(format!(
                    "host predicate '{:?}' does not match {}",
                    host,
                    std::env::consts::OS
                ));
            }
        }

        if let Some(condition) = &prepared.condition {
            match condition.evaluate(&job.variables) {
                Ok(true) => {}
                Ok(false) => {
                    return Admission::Skip(format!("condition '{}' is false", condition))
                }
                Err(e) => return Admission::Reject(format!("condition evaluation failed: {}", e)),
            }
        }

        if gate_closed && step.policy.is_on_success() {
            return Admission::Skip(SKIPPED_AFTER_FAILURE.to_string());
        }

        Admission::Run
    }

    async fn run_step(
        &self,
        job: &JobConfig,
        prepared: &PreparedStep,
        step_index: usize,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let step = &prepared.step;
        let timeout = step
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        self.event_tx.send_event(ExecutionEvent::step_started(
            &job.identity,
            &step.name,
            step_index,
        ));

        let ctx = StepContext {
            job,
            step,
            step_index,
            timeout,
            working_dir: &self.working_dir,
            cancel,
            events: &self.event_tx,
        };
        let outcome = self.runner.run(&ctx).await;

        self.event_tx.send_event(ExecutionEvent::step_completed(
            &job.identity,
            &step.name,
            step_index,
            outcome.status,
            outcome.duration,
            outcome.exit_code,
        ));

        if outcome.status == StepStatus::TimedOut {
            warn!(job = %job.identity, step = %step.name, ?timeout, "step timed out");
        }

        outcome
    }
}
