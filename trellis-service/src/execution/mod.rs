// Execution Engine Module
// Matrix expansion, run planning, job execution and orchestration

pub mod events;
pub mod job;
pub mod matrix;
pub mod orchestrator;
pub mod plan;

// Re-export key types
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use job::JobExecutor;
pub use matrix::{Dimension, JobConfig, MatrixExpander, MatrixFilter, Variant};
pub use orchestrator::{Orchestrator, OrchestratorConfig, ResolvedConfig, RunResult};
pub use plan::{ExecutionPlan, PreparedStep};
