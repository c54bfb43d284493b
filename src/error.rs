//! Error taxonomy shared by every engine operation.

use std::io;
use std::time::Duration;

use crate::codec::ProtocolError;

/// Every input violation found during pre-flight validation.
///
/// Violations are collected rather than reported one at a time so the caller
/// gets a single consolidated diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Some input validation errors occurred:{}", bullet_list(.violations))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl ValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }
}

fn bullet_list(items: &[String]) -> String {
    items.iter().map(|item| format!("\n- {}", item)).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Pre-flight rejection; no process was spawned.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The program exited non-zero, or exited cleanly without a result span.
    #[error("Error running code: {message}")]
    Execution { message: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Introspection failed: {0}")]
    Introspection(String),

    #[error("Program timed out after {}s", .after.as_secs_f64())]
    Timeout {
        after: Duration,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    #[error("Unit '{0}' has no test code")]
    MissingTestCode(String),

    #[error("Failed to render program: {0}")]
    Template(#[from] minijinja::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
