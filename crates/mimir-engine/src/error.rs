//! Engine error taxonomy
//!
//! Every error carries a stable machine-readable code (`code()`) that the
//! HTTP layer maps onto status codes and that clients can branch on.

use uuid::Uuid;

/// Errors produced by the engine's public operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Request body missing or malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Addressed resource absent
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// State-machine transition would be illegal
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Uniqueness violation (duplicate job id, duplicate active workflow)
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stage handler or notification channel returned an error
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// Cancellation observed at a suspension point
    #[error("cancelled")]
    Cancelled,

    /// Exceeded a per-stage or per-channel timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Database failure (transient failures are retried once before this
    /// surfaces)
    #[error("database error: {0}")]
    Database(anyhow::Error),

    /// External service (graph store, LLM) unreachable
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn workflow_not_found(id: Uuid) -> Self {
        Self::not_found("workflow", id)
    }

    /// Stable machine-readable code for the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound { .. } => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Conflict(_) => "conflict",
            Self::HandlerFailed(_) => "handler_failed",
            Self::Cancelled => "cancelled",
            Self::Timeout(_) => "timeout",
            Self::Database(_) => "database_error",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::InvalidInput("x".into()).code(), "invalid_input");
        assert_eq!(EngineError::workflow_not_found(Uuid::nil()).code(), "not_found");
        assert_eq!(EngineError::Cancelled.code(), "cancelled");
        assert_eq!(
            EngineError::Database(anyhow::anyhow!("x")).code(),
            "database_error"
        );
    }
}
