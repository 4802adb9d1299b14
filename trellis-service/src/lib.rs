// Trellis Service Library
// Matrix-driven pipeline execution: expansion, conditions, step runners and reports

pub mod error;
pub mod execution;
pub mod expression;
pub mod parser;
pub mod runners;
pub mod testing;

// Re-export commonly used types
pub use error::{ConfigError, ReportError, ServiceError, ServiceResult};

// Re-export parser types
pub use parser::{
    DefinitionParser, JobOutcome, JobStatus, ParseError, ParseErrorKind, ParseResult,
    PipelineDefinition, RunStatus, Step, StepOutcome, StepStatus,
};

// Re-export expression types
pub use expression::{Condition, EvalError};

// Re-export execution types
pub use execution::{
    progress_channel, ExecutionEvent, ExecutionPlan, JobConfig, MatrixExpander, MatrixFilter,
    Orchestrator, OrchestratorConfig, ProgressReceiver, ProgressSender, RunResult,
};

// Re-export runner types
pub use runners::{Shell, ShellRunner, StepContext, StepRunner};

// Re-export report types
pub use testing::{Report, ReportFormat, RunSummary, TestReporter};
