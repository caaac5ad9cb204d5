//! Error types for the feedback coordinator

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the feedback coordinator
#[derive(Error, Debug)]
pub enum Error {
    // Source-level errors (absorbed at the coordinator boundary)
    #[error("Feedback source {source_name} unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    #[error("Feedback source {source_name} timed out after {timeout_ms}ms")]
    SourceTimeout { source_name: String, timeout_ms: u64 },

    #[error("Feedback source {source_name} failed to apply decision: {reason}")]
    ApplyDecision { source_name: String, reason: String },

    #[error("Health probe failed: {0}")]
    Probe(String),

    // Cycle-level errors (drive the coordinator into recovery)
    #[error("Coordination cycle failed: {0}")]
    CoordinationCycle(String),

    #[error("Coordination cycle exceeded {0}s")]
    CycleTimeout(u64),

    #[error("Coordination cycle abandoned: coordinator stopping")]
    CycleAbandoned,

    // Lifecycle errors
    #[error("Coordination already active")]
    AlreadyActive,

    #[error("Coordination not active")]
    NotActive,

    // Rule registry errors
    #[error("Decision rule already registered: {0}")]
    DuplicateRule(String),

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Build a `SourceUnavailable` error
    pub fn unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. }
                | Error::SourceTimeout { .. }
                | Error::Http(_)
                | Error::CoordinationCycle(_)
                | Error::CycleTimeout(_)
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::unavailable("health", "down").is_retryable());
        assert!(Error::CycleTimeout(20).is_retryable());
        assert!(!Error::DuplicateRule("X".to_string()).is_retryable());
        assert!(!Error::CycleAbandoned.is_retryable());
    }

    #[test]
    fn test_display_names_source() {
        let err = Error::ApplyDecision {
            source_name: "performance".to_string(),
            reason: "rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Feedback source performance failed to apply decision: rejected"
        );
    }
}
