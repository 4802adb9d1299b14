// Execution Events
// Progress reporting and event types for a matrix run

use crate::parser::models::{JobStatus, RunStatus, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Validation passed and jobs are about to be dispatched
    RunStarted {
        pipeline_name: String,
        total_jobs: usize,
        max_parallel: usize,
    },

    /// Every job reached a terminal state
    RunCompleted {
        pipeline_name: String,
        status: RunStatus,
        duration: Duration,
    },

    /// Job execution started
    JobStarted {
        job: String,
        index: usize,
        total_steps: usize,
    },

    /// Job execution completed
    JobCompleted {
        job: String,
        status: JobStatus,
        duration: Duration,
    },

    /// Job never started (fail-fast or cancellation)
    JobSkipped { job: String, reason: String },

    /// Step execution started
    StepStarted {
        job: String,
        step_name: String,
        step_index: usize,
    },

    /// One line of step output (stdout or stderr)
    StepOutput {
        job: String,
        step_index: usize,
        output: String,
        is_error: bool,
    },

    /// Step execution completed
    StepCompleted {
        job: String,
        step_name: String,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    },

    /// Step was skipped (host, condition or earlier failure)
    StepSkipped {
        job: String,
        step_name: String,
        step_index: usize,
        reason: String,
    },

    /// A test-result payload could not be converted
    ReportProblem {
        job: String,
        step_name: String,
        message: String,
    },
}

impl ExecutionEvent {
    pub fn run_started(name: impl Into<String>, total_jobs: usize, max_parallel: usize) -> Self {
        Self::RunStarted {
            pipeline_name: name.into(),
            total_jobs,
            max_parallel,
        }
    }

    pub fn run_completed(name: impl Into<String>, status: RunStatus, duration: Duration) -> Self {
        Self::RunCompleted {
            pipeline_name: name.into(),
            status,
            duration,
        }
    }

    pub fn job_started(job: impl Into<String>, index: usize, total_steps: usize) -> Self {
        Self::JobStarted {
            job: job.into(),
            index,
            total_steps,
        }
    }

    pub fn job_completed(job: impl Into<String>, status: JobStatus, duration: Duration) -> Self {
        Self::JobCompleted {
            job: job.into(),
            status,
            duration,
        }
    }

    pub fn job_skipped(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobSkipped {
            job: job.into(),
            reason: reason.into(),
        }
    }

    pub fn step_started(
        job: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
    ) -> Self {
        Self::StepStarted {
            job: job.into(),
            step_name: step_name.into(),
            step_index,
        }
    }

    pub fn step_output(
        job: impl Into<String>,
        step_index: usize,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::StepOutput {
            job: job.into(),
            step_index,
            output: output.into(),
            is_error,
        }
    }

    pub fn step_completed(
        job: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        status: StepStatus,
        duration: Duration,
        exit_code: Option<i32>,
    ) -> Self {
        Self::StepCompleted {
            job: job.into(),
            step_name: step_name.into(),
            step_index,
            status,
            duration,
            exit_code,
        }
    }

    pub fn step_skipped(
        job: impl Into<String>,
        step_name: impl Into<String>,
        step_index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::StepSkipped {
            job: job.into(),
            step_name: step_name.into(),
            step_index,
            reason: reason.into(),
        }
    }

    /// Identity of the job this event belongs to, if any
    pub fn job(&self) -> Option<&str> {
        match self {
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
            Self::JobStarted { job, .. }
            | Self::JobCompleted { job, .. }
            | Self::JobSkipped { job, .. }
            | Self::StepStarted { job, .. }
            | Self::StepOutput { job, .. }
            | Self::StepCompleted { job, .. }
            | Self::StepSkipped { job, .. }
            | Self::ReportProblem { job, .. } => Some(job),
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_progress_channel() {
        let (tx, mut rx) = progress_channel();

        tx.send_event(ExecutionEvent::run_started("ci", 4, 2));
        tx.send_event(ExecutionEvent::job_started("linux-stable", 0, 3));

        let event1 = rx.recv().await.unwrap();
        assert!(matches!(event1, ExecutionEvent::RunStarted { total_jobs: 4, .. }));

        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.job(), Some("linux-stable"));
    }

    #[test]
    fn test_event_construction() {
        let event = ExecutionEvent::step_completed(
            "windows-beta",
            "build",
            1,
            StepStatus::Failed,
            Duration::from_secs(30),
            Some(101),
        );

        if let ExecutionEvent::StepCompleted {
            job,
            step_name,
            step_index,
            status,
            duration,
            exit_code,
        } = event
        {
            assert_eq!(job, "windows-beta");
            assert_eq!(step_name, "build");
            assert_eq!(step_index, 1);
            assert_eq!(status, StepStatus::Failed);
            assert_eq!(duration, Duration::from_secs(30));
            assert_eq!(exit_code, Some(101));
        } else {
            panic!("wrong event type");
        }
    }

    #[test]
    fn test_optional_sender() {
        let sender: Option<ProgressSender> = None;
        // Should not panic
        sender.send_event(ExecutionEvent::job_skipped("linux-beta", "canceled by fail-fast"));
    }
}
