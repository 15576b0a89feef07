//! Domain-specific error types for the aircast pipeline.
//!
//! All fallible operations return `Result<T, CastError>`.
//! Per-frame errors (submission, encoding, backpressure) are absorbed
//! by the pipeline and only mean that frame never reaches the wire;
//! connection-level errors are fatal to the streaming session.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the aircast pipeline.
#[derive(Debug, Error)]
pub enum CastError {
    // ── Encoder Errors ───────────────────────────────────────────
    /// The compression session cannot be created for the requested
    /// parameters. Fatal at initialization; there is no fallback path.
    #[error("unsupported encoder configuration: {0}")]
    Configuration(String),

    /// A specific frame was rejected at submission (session closed,
    /// saturated, or the frame does not match the session geometry).
    /// Non-fatal: that frame is dropped, later frames may succeed.
    #[error("frame submission rejected: {0}")]
    EncodeSubmission(&'static str),

    /// The compression backend failed on a specific frame. Absorbed
    /// by the completion path; that frame is dropped.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The link left the `Ready` state; all pending sends fail and
    /// the transport does not reconnect.
    #[error("connection lost")]
    ConnectionLost,

    /// The send queue bound was exceeded. The unit is dropped; slow
    /// network conditions shed frames instead of growing memory.
    #[error("send queue full (depth {depth})")]
    Backpressure { depth: usize },

    /// The unit was refused or released because the transport is
    /// shutting down.
    #[error("send cancelled: transport closed")]
    Cancelled,

    /// The payload exceeds the framing sanity ceiling.
    #[error("unit too large: {size} bytes (max {max})")]
    UnitTooLarge { size: usize, max: usize },

    // ── Plumbing Errors ──────────────────────────────────────────
    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A component was driven from an invalid lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A spawned task failed or was torn down abnormally.
    #[error("task error: {0}")]
    Task(String),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CastError::ChannelClosed
    }
}

impl From<tokio::task::JoinError> for CastError {
    fn from(e: tokio::task::JoinError) -> Self {
        CastError::Task(e.to_string())
    }
}

impl CastError {
    /// Whether this error is fatal to the streaming session, as
    /// opposed to costing only the frame it occurred on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CastError::Configuration(_)
                | CastError::Connection(_)
                | CastError::ConnectionLost
                | CastError::Cancelled
                | CastError::Task(_)
        )
    }
}
