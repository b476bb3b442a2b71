//! Domain-specific error types for the XFS proxy engine.
//!
//! Internal fallible operations return `Result<T, XfsError>`. The public
//! request operations on [`DeviceProxy`](crate::DeviceProxy) report
//! failures as structured payloads instead, so asynchronous completions
//! and synchronous waits share a single representation.

use thiserror::Error;

/// The canonical error type for the XFS proxy engine.
#[derive(Debug, Error)]
pub enum XfsError {
    // ── Construction Errors ──────────────────────────────────────
    /// The device class tag is not exactly three alphanumeric characters.
    #[error("invalid device class {0:?}: expected 3 alphanumeric characters")]
    InvalidDeviceClass(String),

    /// The device identity is empty.
    #[error("device identity must not be empty")]
    EmptyIdentity,

    /// The device address could not be parsed.
    #[error("invalid device address {address:?} for {device_id}")]
    InvalidEndpoint { device_id: String, address: String },

    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame violated the request/response contract.
    #[error("protocol violation on {request_id}: {reason}")]
    ProtocolViolation { request_id: String, reason: String },

    // ── Frame Errors ─────────────────────────────────────────────
    /// Declared frame length exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// The link is down and could not be re-established.
    #[error("not connected")]
    NotConnected,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a frame body failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for XfsError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        XfsError::ChannelClosed
    }
}

impl From<serde_json::Error> for XfsError {
    fn from(e: serde_json::Error) -> Self {
        XfsError::Encoding(e.to_string())
    }
}
