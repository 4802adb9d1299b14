// Pipeline Orchestrator
// Runs every job of a plan concurrently and collects the run report

use crate::error::ConfigError;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::job::JobExecutor;
use crate::execution::matrix::{JobConfig, MatrixFilter};
use crate::execution::plan::{ExecutionPlan, PreparedStep};
use crate::parser::models::{JobOutcome, JobStatus, PipelineDefinition, RunStatus, Settings};
use crate::runners::{ShellRunner, StepRunner};
use crate::testing::aggregator::{Report, ResultAggregator};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default step timeout (60 minutes)
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Reason recorded on jobs that fail-fast kept from starting
pub const CANCELED_BY_FAIL_FAST: &str = "canceled by fail-fast";

/// Reason recorded on jobs that run cancellation kept from starting
pub const RUN_CANCELED: &str = "run canceled";

/// Run options that override the definition's `settings`
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub fail_fast: Option<bool>,
    /// Maximum concurrently running jobs
    pub max_parallel: Option<usize>,
    /// Timeout for steps that do not set their own
    pub default_step_timeout: Option<Duration>,
    /// Base directory for step processes
    pub working_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fail_fast: None,
            max_parallel: None,
            default_step_timeout: None,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Explicit option, then definition setting, then built-in default
    pub fn resolve(&self, settings: &Settings) -> ResolvedConfig {
        let default_parallel = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        ResolvedConfig {
            fail_fast: self.fail_fast.or(settings.fail_fast).unwrap_or(false),
            max_parallel: self
                .max_parallel
                .or(settings.max_parallel)
                .unwrap_or(default_parallel)
                .max(1),
            step_timeout: self
                .default_step_timeout
                .or(settings.step_timeout_seconds.map(Duration::from_secs))
                .unwrap_or(DEFAULT_STEP_TIMEOUT),
        }
    }
}

/// Effective settings of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub fail_fast: bool,
    pub max_parallel: usize,
    pub step_timeout: Duration,
}

/// Verdict and report of one run
#[derive(Debug, Clone)]
pub struct RunResult {
    pub status: RunStatus,
    pub report: Report,
}

/// Expands a definition into jobs and runs them
pub struct Orchestrator {
    config: OrchestratorConfig,
    runner: Arc<dyn StepRunner>,
    event_tx: Option<ProgressSender>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            runner: Arc::new(ShellRunner::new()),
            event_tx: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the shell runner
    pub fn with_runner(mut self, runner: Arc<dyn StepRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run under an external token; canceling it kills running steps
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate, expand and run. Nothing is spawned if validation fails.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        filters: &[MatrixFilter],
    ) -> Result<RunResult, ConfigError> {
        let plan = ExecutionPlan::build(definition, filters)?;
        Ok(self.execute(plan).await)
    }

    /// Run a prepared plan to completion
    pub async fn execute(&self, plan: ExecutionPlan) -> RunResult {
        let start = Instant::now();
        let resolved = self.config.resolve(&plan.settings);
        let name = plan.name.clone();
        let total = plan.jobs.len();

        info!(
            pipeline = %name,
            jobs = total,
            max_parallel = resolved.max_parallel,
            fail_fast = resolved.fail_fast,
            "run started"
        );
        self.event_tx.send_event(ExecutionEvent::run_started(
            &name,
            total,
            resolved.max_parallel,
        ));

        let (outcome_tx, outcome_rx) = mpsc::channel(total.max(1));
        let aggregator = ResultAggregator::new(&name).with_progress(self.event_tx.clone());

        let ((), aggregator) = tokio::join!(
            self.dispatch(plan, resolved, outcome_tx),
            aggregator.collect(outcome_rx)
        );

        let duration = start.elapsed();
        let mut report = aggregator.finish(duration);
        if self.cancel.is_cancelled() {
            report.summary.status = RunStatus::Failed;
        }
        let status = report.summary.status;

        info!(
            pipeline = %name,
            ?status,
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            ?duration,
            "run finished"
        );
        self.event_tx
            .send_event(ExecutionEvent::run_completed(&name, status, duration));

        RunResult { status, report }
    }

    /// Start jobs in matrix order as permits free up; the only writer of
    /// `outcome_tx`.
    async fn dispatch(
        &self,
        plan: ExecutionPlan,
        resolved: ResolvedConfig,
        outcome_tx: mpsc::Sender<JobOutcome>,
    ) {
        let steps: Arc<[PreparedStep]> = plan.steps.into();
        let executor = Arc::new(
            JobExecutor::new(
                Arc::clone(&self.runner),
                self.config.working_dir.clone(),
                resolved.step_timeout,
            )
            .with_progress(self.event_tx.clone()),
        );
        let semaphore = Arc::new(Semaphore::new(resolved.max_parallel));
        let dispatch_token = self.cancel.child_token();

        let mut tracker = Tracker {
            jobs: plan.jobs.clone(),
            reported: vec![false; plan.jobs.len()],
            outcome_tx,
        };
        let mut tasks: JoinSet<(usize, JobOutcome)> = JoinSet::new();
        let mut pending = plan.jobs.into_iter();

        for job in pending.by_ref() {
            let permit = loop {
                tokio::select! {
                    biased;
                    _ = dispatch_token.cancelled() => break None,
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        tracker.finished(joined).await;
                    }
                    permit = Arc::clone(&semaphore).acquire_owned() => break permit.ok(),
                }
            };

            let Some(permit) = permit else {
                tracker.skip(&job, self.skip_reason(), &self.event_tx).await;
                break;
            };

            debug!(job = %job.identity, index = job.index, "dispatching job");
            let executor = Arc::clone(&executor);
            let steps = Arc::clone(&steps);
            let cancel = self.cancel.clone();
            let dispatch = dispatch_token.clone();
            let fail_fast = resolved.fail_fast;
            tasks.spawn(async move {
                let outcome = executor.execute(&job, &steps, &cancel).await;
                // Cancel before the permit frees up so no new job slips in
                if fail_fast && outcome.status == JobStatus::Failed && !dispatch.is_cancelled() {
                    info!(job = %outcome.identity, "fail-fast: canceling jobs that have not started");
                    dispatch.cancel();
                }
                drop(permit);
                (job.index, outcome)
            });
        }

        for job in pending {
            tracker.skip(&job, self.skip_reason(), &self.event_tx).await;
        }

        while let Some(joined) = tasks.join_next().await {
            tracker.finished(joined).await;
        }

        tracker.report_lost().await;
    }

    fn skip_reason(&self) -> &'static str {
        if self.cancel.is_cancelled() {
            RUN_CANCELED
        } else {
            CANCELED_BY_FAIL_FAST
        }
    }
}

/// Bookkeeping for submitted outcomes
struct Tracker {
    jobs: Vec<JobConfig>,
    reported: Vec<bool>,
    outcome_tx: mpsc::Sender<JobOutcome>,
}

impl Tracker {
    async fn submit(&mut self, outcome: JobOutcome) {
        if let Some(flag) = self.reported.get_mut(outcome.index) {
            *flag = true;
        }
        if self.outcome_tx.send(outcome).await.is_err() {
            warn!("result aggregator stopped before the run finished");
        }
    }

    async fn finished(&mut self, joined: Result<(usize, JobOutcome), JoinError>) {
        match joined {
            Ok((_, outcome)) => self.submit(outcome).await,
            // The job is reported by `report_lost` once every task is joined
            Err(e) => error!(error = %e, "job task ended abnormally"),
        }
    }

    async fn skip(&mut self, job: &JobConfig, reason: &str, events: &Option<ProgressSender>) {
        debug!(job = %job.identity, %reason, "job skipped");
        events.send_event(ExecutionEvent::job_skipped(&job.identity, reason));
        self.submit(JobOutcome {
            identity: job.identity.clone(),
            index: job.index,
            variables: job.variables.clone(),
            status: JobStatus::Skipped,
            steps: Vec::new(),
            duration: Duration::ZERO,
            skip_reason: Some(reason.to_string()),
            report_errors: Vec::new(),
        })
        .await;
    }

    /// Jobs whose task panicked count as failed
    async fn report_lost(&mut self) {
        let lost: Vec<JobConfig> = self
            .jobs
            .iter()
            .filter(|job| !self.reported.get(job.index).copied().unwrap_or(true))
            .cloned()
            .collect();

        for job in lost {
            self.submit(JobOutcome {
                identity: job.identity.clone(),
                index: job.index,
                variables: job.variables,
                status: JobStatus::Failed,
                steps: Vec::new(),
                duration: Duration::ZERO,
                skip_reason: Some("job task ended abnormally".to_string()),
                report_errors: Vec::new(),
            })
            .await;
        }
    }
}
