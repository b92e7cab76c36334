//! Error types for the compendium graph store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompendiumError>;

#[derive(Error, Debug)]
pub enum CompendiumError {
    #[error("Node '{node_id}' references unknown type '{type_id}'")]
    UnknownType { node_id: String, type_id: String },

    #[error("Invalid path reference: {0}")]
    InvalidPath(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Run '{0}' not found")]
    RunNotFound(String),

    #[error("Run queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompendiumError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            CompendiumError::UnknownType { .. } => "UNKNOWN_TYPE",
            CompendiumError::InvalidPath(_) => "INVALID_PATH",
            CompendiumError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            CompendiumError::InvalidInput(_) => "INVALID_INPUT",
            CompendiumError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            CompendiumError::RunNotFound(_) => "RUN_NOT_FOUND",
            CompendiumError::QueueClosed => "QUEUE_CLOSED",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Transient failures that a caller may resubmit.
    pub fn is_retriable(&self) -> bool {
        matches!(self, CompendiumError::StoreUnavailable(_) | CompendiumError::Io(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for CompendiumError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CompendiumError::StoreUnavailable(format!("lock poisoned: {err}"))
    }
}
