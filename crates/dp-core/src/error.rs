//! Error taxonomy shared by the ingestion and query pipelines.
//!
//! Mirrors the split the teacher framework draws between a leaf error enum
//! (`SwitchError`) and a single outward-facing error type: every fatal or
//! state/configuration failure funnels through [`DpError`], while per-message
//! outcomes (an accept or a rejection) are recorded, never raised.

use std::fmt;

/// Unified error domain for every blocking or fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum DpError {
    /// Invalid option value, or an attempt to mutate configuration while active.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted from a lifecycle state that forbids it.
    #[error("invalid state: expected {expected}, found {found}")]
    State {
        expected: &'static str,
        found: &'static str,
    },

    /// A structural invariant was violated (column length mismatch, duplicate
    /// column name, duplicate source within a correlated block, ...).
    #[error("consistency violation: {0}")]
    Consistency(String),

    /// Two sampling blocks cover overlapping timebases.
    #[error("overlapping sampling blocks: {0}")]
    Overlap(String),

    /// Sampling blocks are not in non-decreasing `(start, duration)` order.
    #[error("non-monotonic block order: {0}")]
    Order(String),

    /// The buffer or channel has reached its closed state.
    #[error("buffer or channel is closed")]
    Closed,

    /// A blocking wait was cancelled before it could complete.
    #[error("operation interrupted")]
    Interrupted,

    /// A gRPC transport failure.
    #[error("transport failure: {0}")]
    Transport(#[from] tonic::Status),

    /// The server accepted the request but rejected its contents. This is
    /// recorded per-message; it is not pipeline-fatal.
    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// A caller-supplied deadline elapsed before the operation completed.
    #[error("operation timed out")]
    Timeout,
}

/// Result alias used pervasively across the crate.
pub type DpResult<T> = Result<T, DpError>;

impl DpError {
    pub fn configuration(message: impl Into<String>) -> Self {
        DpError::Configuration(message.into())
    }

    pub fn state(expected: &'static str, found: &'static str) -> Self {
        DpError::State { expected, found }
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        DpError::Consistency(message.into())
    }
}

/// A non-fatal, per-request classification returned alongside an outcome
/// record. Distinct from [`DpError`]: rejections never abort a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Accepted,
    Rejected { code: String, message: String },
    Exception { detail: String },
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Accepted => write!(f, "accepted"),
            RequestOutcome::Rejected { code, message } => {
                write!(f, "rejected ({code}): {message}")
            }
            RequestOutcome::Exception { detail } => write!(f, "exception: {detail}"),
        }
    }
}
