use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the memory engine.
///
/// The variants follow the retry policy of the engine: only
/// [`MemoryError::BackendUnavailable`] is ever retried; everything else is
/// reported to the caller immediately.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Bad input shape (missing prompt, nil id, empty embedding, unconfirmed clear).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("memory entry {id} not found")]
    NotFound { id: Uuid },

    /// Network failure or timeout talking to a remote store.
    #[error("backend unavailable during {operation}: {cause}")]
    BackendUnavailable {
        operation: String,
        id: Option<Uuid>,
        cause: String,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("a backend switch is already in progress")]
    ConcurrentSwitch,

    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage I/O error: {0}")]
    Io(String),
}

impl MemoryError {
    /// Build a `BackendUnavailable` error for an operation.
    pub fn unavailable(operation: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        MemoryError::BackendUnavailable {
            operation: operation.into(),
            id: None,
            cause: cause.to_string(),
        }
    }

    /// Attach the id of the entry being operated on, when the error carries one.
    pub fn with_id(self, entry_id: Uuid) -> Self {
        match self {
            MemoryError::BackendUnavailable {
                operation, cause, ..
            } => MemoryError::BackendUnavailable {
                operation,
                id: Some(entry_id),
                cause,
            },
            other => other,
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MemoryError::BackendUnavailable { .. })
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_display() {
        let err = MemoryError::DimensionMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "embedding dimension mismatch: expected 4, got 3"
        );
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(MemoryError::unavailable("store", "connection refused").is_retryable());
        assert!(!MemoryError::Validation("empty prompt".into()).is_retryable());
        assert!(!MemoryError::ConcurrentSwitch.is_retryable());
        assert!(
            !MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_with_id_keeps_operation_and_cause() {
        let id = Uuid::now_v7();
        let err = MemoryError::unavailable("get", "timed out").with_id(id);
        match err {
            MemoryError::BackendUnavailable {
                operation,
                id: Some(got),
                cause,
            } => {
                assert_eq!(operation, "get");
                assert_eq!(got, id);
                assert_eq!(cause, "timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
