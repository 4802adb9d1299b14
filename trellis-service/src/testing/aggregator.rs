// Result Aggregator
// Collects job outcomes into the run summary and the test report

use crate::error::ReportError;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::parser::models::{JobOutcome, JobStatus, RunStatus, StepStatus};
use crate::testing::libtest::parse_output;
use crate::testing::{test_triples, TestCaseRecord, TestCaseStatus, TestSuiteReport};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Job counts and overall verdict of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub status: RunStatus,
    pub duration: Duration,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub name: String,
    pub summary: RunSummary,
    /// Job outcomes in matrix order
    pub jobs: Vec<JobOutcome>,
    /// One suite per job, in matrix order
    pub suites: Vec<TestSuiteReport>,
    #[serde(default)]
    pub errors: Vec<ReportError>,
}

impl Report {
    pub fn test_triples(&self) -> BTreeSet<(String, String, TestCaseStatus)> {
        test_triples(&self.suites)
    }

    pub fn job(&self, identity: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.identity == identity)
    }

    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|s| s.cases.len()).sum()
    }
}

/// Owns job outcomes once they are submitted
pub struct ResultAggregator {
    name: String,
    jobs: Vec<JobOutcome>,
    suites: Vec<TestSuiteReport>,
    errors: Vec<ReportError>,
    event_tx: Option<ProgressSender>,
}

impl ResultAggregator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
            suites: Vec::new(),
            errors: Vec::new(),
            event_tx: None,
        }
    }

    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Drain the outcome channel until every sender is gone
    pub async fn collect(mut self, mut rx: mpsc::Receiver<JobOutcome>) -> Self {
        while let Some(outcome) = rx.recv().await {
            self.add(outcome);
        }
        self
    }

    /// Record one job and extract its test cases
    pub fn add(&mut self, mut outcome: JobOutcome) {
        let mut suite = TestSuiteReport::new(&outcome.identity);

        for step in &outcome.steps {
            if step.status == StepStatus::Skipped || step.output.is_empty() {
                continue;
            }

            let parsed = parse_output(&step.output);
            if !parsed.cases.is_empty() {
                debug!(
                    job = %outcome.identity,
                    step = %step.name,
                    cases = parsed.cases.len(),
                    "test results found in step output"
                );
            }

            suite
                .cases
                .extend(parsed.cases.into_iter().map(|case| TestCaseRecord {
                    job: outcome.identity.clone(),
                    name: case.name,
                    status: case.status,
                    duration: case.duration,
                    failure_message: case.failure_message,
                }));

            for problem in parsed.problems {
                warn!(
                    job = %outcome.identity,
                    step = %step.name,
                    "{}",
                    problem
                );
                self.event_tx.send_event(ExecutionEvent::ReportProblem {
                    job: outcome.identity.clone(),
                    step_name: step.name.clone(),
                    message: problem.clone(),
                });
                outcome
                    .report_errors
                    .push(ReportError::new(&outcome.identity, &step.name, problem));
            }
        }

        self.errors.extend(outcome.report_errors.iter().cloned());
        self.suites.push(suite);
        self.jobs.push(outcome);
    }

    /// Build the final report; the run fails iff any job failed
    pub fn finish(mut self, duration: Duration) -> Report {
        self.jobs.sort_by_key(|j| j.index);

        let order: Vec<&str> = self.jobs.iter().map(|j| j.identity.as_str()).collect();
        self.suites.sort_by_key(|s| {
            order
                .iter()
                .position(|id| *id == s.job)
                .unwrap_or(usize::MAX)
        });

        let count = |status: JobStatus| self.jobs.iter().filter(|j| j.status == status).count();
        let failed = count(JobStatus::Failed);
        let summary = RunSummary {
            succeeded: count(JobStatus::Succeeded),
            failed,
            skipped: count(JobStatus::Skipped),
            status: if failed == 0 {
                RunStatus::Succeeded
            } else {
                RunStatus::Failed
            },
            duration,
        };

        Report {
            name: self.name,
            summary,
            jobs: self.jobs,
            suites: self.suites,
            errors: self.errors,
        }
    }
}
