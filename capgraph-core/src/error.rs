//! Error types for the procedural memory engine.

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the core engine.
///
/// "Degraded learning" and "pathfinder miss" are intentionally absent: per
/// the error handling design, both are expected outcomes conveyed through
/// ordinary return values (`TrainFromTracesResult::fallback`,
/// `HyperpathResult::found`), never through `Err(...)`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad embedding dimension, non-finite values, or an unknown node id.
    /// No state changes occur when this is returned.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A forced synchronous flush found the buffer full, or a training
    /// subprocess ran out of memory. Buffered data is preserved.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A training batch was requested while another was already in flight.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// The subprocess trainer failed; in-memory parameters and priorities
    /// are left untouched.
    #[error("subprocess training failed: {0}")]
    SubprocessTraining(String),

    /// A collaborator-backed storage operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// (De)serialization of a persisted value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem or network I/O failure in a collaborator.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration failed to parse or violated a documented constraint.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Whether the caller can reasonably retry the operation.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ResourceExhausted(_)
                | Error::ConcurrencyConflict(_)
                | Error::Storage(_)
                | Error::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_exhaustion_is_recoverable() {
        let err = Error::ResourceExhausted("buffer full".into());
        assert!(err.is_recoverable());
    }

    #[test]
    fn invalid_input_is_not_recoverable() {
        let err = Error::InvalidInput("bad dimension".into());
        assert!(!err.is_recoverable());
    }
}
