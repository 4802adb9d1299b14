// Service Errors
// Configuration, reporting and umbrella error types

use crate::parser::error::ParseError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A pipeline definition that cannot be run.
///
/// Raised before any job starts; nothing has been spawned when one of these
/// is returned.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Definition(#[from] ParseError),

    #[error("dimension '{dimension}' declares no variants")]
    EmptyDimension { dimension: String },

    #[error("invalid variant label '{label}' in dimension '{dimension}': {reason}")]
    InvalidLabel {
        dimension: String,
        label: String,
        reason: String,
    },

    #[error("variable '{variable}' is declared by both dimension '{first}' and dimension '{second}'")]
    VariableCollision {
        variable: String,
        first: String,
        second: String,
    },

    #[error("variable '{variable}' in dimension '{dimension}' uses a reserved name")]
    ReservedVariable { variable: String, dimension: String },

    #[error("exclude rule {index} references unknown {what}")]
    UnknownExclude { index: usize, what: String },

    #[error("invalid matrix filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("matrix filters select no jobs")]
    EmptySelection,

    #[error("invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("invalid condition on step '{step}': {message}")]
    InvalidCondition { step: String, message: String },

    #[error("condition on step '{step}' references undeclared variable '{variable}' (job '{job}')")]
    UnknownVariable {
        step: String,
        variable: String,
        job: String,
    },
}

/// A test-result payload that could not be converted.
///
/// Attached to the job it came from and to the run summary; never changes a
/// job's verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("report error in job '{job}', step '{step}': {message}")]
pub struct ReportError {
    pub job: String,
    pub step: String,
    pub message: String,
}

impl ReportError {
    pub fn new(
        job: impl Into<String>,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            job: job.into(),
            step: step.into(),
            message: message.into(),
        }
    }
}

/// Umbrella error for library entry points that touch the filesystem
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Report(String),
}

impl From<ParseError> for ServiceError {
    fn from(err: ParseError) -> Self {
        ServiceError::Config(ConfigError::Definition(err))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
