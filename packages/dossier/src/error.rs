//! Typed errors for the pipeline core.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Two families:
//! - [`PipelineError`] - errors surfaced by the core's own operations
//! - [`CollaboratorError`] - failures reported by external collaborators
//!   (crawl, scrape, content-understanding), split by retryability

use thiserror::Error;
use uuid::Uuid;

use crate::types::job::{Stage, Subject};

/// Errors that can occur in pipeline core operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// URL failed normalization
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No source registered for the URL
    #[error("source not found: {url}")]
    SourceNotFound { url: String },

    /// No page registered for the URL
    #[error("page not found: {url}")]
    PageNotFound { url: String },

    /// No job with this id in the ledger
    #[error("job not found: {id}")]
    JobNotFound { id: Uuid },

    /// Explicit source creation hit an existing record
    #[error("source already exists: {url}")]
    SourceAlreadyExists { url: String },

    /// Explicit page creation hit an existing record
    #[error("page already exists: {url}")]
    PageAlreadyExists { url: String },

    /// A job for this (subject, stage) is still running
    #[error("a {stage} job is already in flight for {subject}")]
    DuplicateInFlight { subject: Subject, stage: Stage },

    /// The job already has a recorded outcome
    #[error("job {id} already has an outcome")]
    AlreadyCompleted { id: Uuid },

    /// The outcome was already approved through the review gate
    #[error("job {id} is already approved")]
    AlreadyReviewed { id: Uuid },

    /// The outcome is not in an editable state
    #[error("outcome of job {id} cannot be edited: {reason}")]
    EditNotAllowed { id: Uuid, reason: String },

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The work queue was closed while enqueueing
    #[error("work queue closed")]
    QueueClosed,
}

impl PipelineError {
    /// Wrap an arbitrary storage-layer error.
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// Failures reported by external collaborators.
///
/// The split drives the dispatcher's retry policy: transient failures
/// (network, timeout) are retried with backoff up to a bounded attempt
/// count; permanent failures (bad input, unrecoverable responses) are
/// recorded as terminal Error outcomes immediately.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// Network error, timeout - retryable
    #[error("transient collaborator failure: {0}")]
    Transient(String),

    /// Bad input, unrecoverable response - not retryable
    #[error("permanent collaborator failure: {0}")]
    Permanent(String),
}

impl CollaboratorError {
    /// Whether the dispatcher should retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }

    /// The underlying failure message.
    pub fn message(&self) -> &str {
        match self {
            CollaboratorError::Transient(msg) | CollaboratorError::Permanent(msg) => msg,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for collaborator calls.
pub type CollabResult<T> = std::result::Result<T, CollaboratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CollaboratorError::Transient("timeout".into()).is_transient());
        assert!(!CollaboratorError::Permanent("HTTP 404".into()).is_transient());
    }

    #[test]
    fn message_strips_the_classification() {
        let err = CollaboratorError::Transient("connection reset".into());
        assert_eq!(err.message(), "connection reset");
    }
}
