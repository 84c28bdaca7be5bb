//! Error taxonomy for the archival core.
//!
//! Client-facing surfaces only ever see `NotFound` and
//! `TemporarilyUnavailable`; every other variant is an internal signal
//! consumed by the migration engine's scan loop or the router's retry
//! logic.

use thiserror::Error;

/// Result alias used throughout the archival core.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors produced by the tracker, engine, router, and store adapters.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Record absent from every tier.
    #[error("record '{0}' not found in any tier")]
    NotFound(String),

    /// Compare-and-set lost the race; the caller may retry with backoff.
    #[error("transition conflict for record '{id}': expected {expected}, found {found}")]
    Conflict {
        id: String,
        expected: String,
        found: String,
    },

    /// Cold copy does not match the source digest. Never retried
    /// automatically within the same attempt.
    #[error("cold copy verification failed for record '{0}'")]
    VerificationFailed(String),

    /// Timeout or connection-level failure on a store adapter.
    #[error("transient storage failure: {0}")]
    TransientIo(String),

    /// Tracker entry inconsistent with consistency-log replay.
    /// Surfaced for operator review, never silently resolved.
    #[error("stale tracker state for record '{id}': {detail}")]
    StaleState { id: String, detail: String },

    /// Local retries exhausted; surfaced to the API caller.
    #[error("record '{0}' temporarily unavailable, retries exhausted")]
    TemporarilyUnavailable(String),

    /// Payload could not be serialized or deserialized.
    #[error("payload codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Whether a local retry (same component, backoff) is permitted.
    pub fn is_transient(&self) -> bool {
        matches!(self, ArchiveError::TransientIo(_))
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::TransientIo(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ArchiveError::TransientIo("timeout".into()).is_transient());
        assert!(!ArchiveError::NotFound("r1".into()).is_transient());
        assert!(!ArchiveError::VerificationFailed("r1".into()).is_transient());
        assert!(!ArchiveError::Conflict {
            id: "r1".into(),
            expected: "none".into(),
            found: "copy_pending".into(),
        }
        .is_transient());
    }

    #[test]
    fn test_io_error_maps_to_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        let err: ArchiveError = io.into();
        assert!(err.is_transient());
    }
}
