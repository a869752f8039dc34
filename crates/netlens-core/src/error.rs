//! Library-wide error types
//!
//! Errors only ever flow back to the embedding application (construction,
//! sink attachment, introspection, configuration). The instrumentation source
//! never sees one of these.

use thiserror::Error;

/// Error type for the netlens inspector
#[derive(Debug, Error)]
pub enum InspectorError {
    /// The confinement worker thread could not be started
    #[error("Failed to spawn serializer worker: {0}")]
    WorkerSpawn(String),

    /// The confinement queue is gone (inspector shut down)
    #[error("Serializer queue is closed")]
    QueueClosed,

    /// A synchronous round trip was requested from inside the confinement context
    #[error("Reentrant call from the serializer context: {0}")]
    Reentrant(&'static str),

    /// No tokio runtime to spawn background work on
    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, InspectorError>;

impl From<InspectorError> for String {
    fn from(error: InspectorError) -> String {
        error.to_string()
    }
}

impl From<std::io::Error> for InspectorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for InspectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            InspectorError::QueueClosed.to_string(),
            "Serializer queue is closed"
        );
        assert_eq!(
            InspectorError::Reentrant("flush").to_string(),
            "Reentrant call from the serializer context: flush"
        );
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let converted: InspectorError = err.into();
        assert!(matches!(converted, InspectorError::Serialization(_)));
    }
}
