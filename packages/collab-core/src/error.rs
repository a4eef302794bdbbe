//! Change engine error types.

use std::fmt;

use thiserror::Error;

/// Stage of the apply pipeline at which validators ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStage {
    /// Before the change touches the store
    Pre,
    /// After the change was applied to staged state, before commit
    Post,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStage::Pre => write!(f, "pre-validation"),
            ValidationStage::Post => write!(f, "post-validation"),
        }
    }
}

/// Change engine errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollabError {
    /// A validator rejected the change
    #[error("Error in backend {stage}: {}", .messages.join("; "))]
    Validation {
        stage: ValidationStage,
        messages: Vec<String>,
    },

    /// Referenced feature, refSeq, assembly or user is missing mid-transaction
    #[error("Referential integrity violation: {0}")]
    ReferentialIntegrity(String),

    /// Payload carries a `typeName` that is not registered
    #[error("Unknown change type '{0}'")]
    UnknownChangeType(String),

    /// Change is structurally unusable (empty ids, missing snapshot, ...)
    #[error("Invalid change: {0}")]
    InvalidChange(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport or backend connectivity failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Transaction misuse (commit after abort and similar)
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error during persistence
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("Transient I/O error: {0}")]
    TransientIoError(String),

    /// Disk full error during persistence
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// Data corruption detected
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),
}

impl CollabError {
    /// Builds a validation error for the given stage.
    pub fn validation(stage: ValidationStage, messages: Vec<String>) -> Self {
        CollabError::Validation { stage, messages }
    }

    /// Shorthand for a referential integrity error.
    pub fn missing(what: impl fmt::Display) -> Self {
        CollabError::ReferentialIntegrity(format!("{} not found", what))
    }

    /// Whether the error is meant to reach end users as an actionable message.
    ///
    /// Everything else is an internal fault and should only be logged.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, CollabError::Validation { .. })
    }
}

impl From<serde_json::Error> for CollabError {
    fn from(error: serde_json::Error) -> Self {
        CollabError::Serialization(error.to_string())
    }
}

/// Result alias used across the change engine.
pub type Result<T> = std::result::Result<T, CollabError>;
