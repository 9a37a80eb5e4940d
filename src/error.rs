use std::sync::Arc;

/// Error produced by a loader, shared between every observer of a resource.
///
/// Errors are matched by identity (see [`ErrorSelector`](crate::ErrorSelector)),
/// so the same allocation is handed to every consumer.
pub type LoaderError = Arc<dyn std::error::Error + Send + Sync>;

/// Error type for resource and store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    /// A key is already registered for a resource of another value type.
    #[error("resource '{key}' is registered with a different value type (expected {expected})")]
    TypeMismatch { key: String, expected: &'static str },
    /// Loader parameters could not be turned into a storage key.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A tag pattern could not be compiled.
    #[error("invalid tag pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    /// The loader panicked instead of returning a result.
    #[error("loader panicked: {0}")]
    LoaderPanicked(String),
}

impl ResourceError {
    /// Create a new type mismatch error.
    pub fn type_mismatch(key: impl Into<String>, expected: &'static str) -> Self {
        ResourceError::TypeMismatch {
            key: key.into(),
            expected,
        }
    }

    /// Create a new invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        ResourceError::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}
