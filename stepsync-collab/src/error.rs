//! Error types for the synchronization core.

use thiserror::Error;

/// Result type for core operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failures surfaced by the history store, the broker and the coordinator.
///
/// A client that must rebase is *not* an error; see
/// [`PushOutcome::Rebase`](crate::coordinator::PushOutcome::Rebase).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Malformed input (empty document id, non-positive client id, negative version).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown document identifier.
    #[error("instance not found: {0}")]
    NotFound(String),

    /// Requested read version is negative.
    #[error("invalid version: {0}")]
    InvalidVersion(i64),

    /// Requested read version is past the end of the history.
    #[error("version {requested} ahead of file version {current}")]
    VersionAhead {
        /// Version the caller asked for.
        requested: i64,
        /// Current version of the document.
        current: usize,
    },

    /// Topic operation against a document that was never created.
    #[error("topic {0} not found")]
    TopicNotFound(String),

    /// The topic control loop has stopped (runtime shutdown).
    #[error("topic {0} closed")]
    TopicClosed(String),
}

impl SyncError {
    /// Returns true if the identifier could not be resolved.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_) | SyncError::TopicNotFound(_))
    }

    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SyncError::TopicClosed(_))
    }
}

/// Delivery failure for a single subscriber.
///
/// Consumed inside the topic loop, never returned to a publisher.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The subscriber's connection is gone.
    #[error("subscriber closed")]
    Closed,

    /// The subscriber is not keeping up.
    #[error("subscriber buffer full")]
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SyncError::NotFound("abc".into()).is_not_found());
        assert!(SyncError::TopicNotFound("abc".into()).is_not_found());
        assert!(!SyncError::InvalidVersion(-1).is_not_found());

        assert!(SyncError::InvalidRequest("bad".into()).is_client_error());
        assert!(!SyncError::TopicClosed("abc".into()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::VersionAhead {
            requested: 7,
            current: 3,
        };
        assert_eq!(err.to_string(), "version 7 ahead of file version 3");
        assert_eq!(
            SyncError::InvalidVersion(-2).to_string(),
            "invalid version: -2"
        );
    }
}
