//! Domain-specific error types for the ghlink session layer.
//!
//! All fallible operations return `Result<T, LinkError>`.
//! Transport failures never surface to operation callers directly; the
//! session turns them into connection-state changes.

use std::time::Duration;
use thiserror::Error;

use crate::frame::FrameKind;

/// The canonical error type for the ghlink core.
#[derive(Debug, Error)]
pub enum LinkError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A frame was shorter than its minimum decodable length.
    #[error("{kind} frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        kind: FrameKind,
        expected: usize,
        actual: usize,
    },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// The device model name in an Info frame is not ASCII.
    #[error("device model name is not ASCII")]
    InvalidModelName,

    /// The frame kind cannot be used for the requested operation.
    #[error("frame kind {0} is not readable")]
    NotReadable(FrameKind),

    // ── Link Errors ──────────────────────────────────────────────
    /// No advertisement carrying the target service was seen in time.
    #[error("scan timed out after {0:?}")]
    ScanTimeout(Duration),

    /// The platform scan API failed.
    #[error("scan failed: {0}")]
    ScanFailure(String),

    /// Link establishment failed or timed out.
    #[error("link failure: {0}")]
    LinkFailure(String),

    /// Discovery finished but required characteristics are missing.
    #[error("handshake incomplete: missing {missing:?}")]
    HandshakeIncomplete { missing: Vec<FrameKind> },

    /// An I/O error on an established link.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The link reported a disconnect with a non-success status.
    #[error("abnormal drop (status {0})")]
    AbnormalDrop(i32),

    /// The remote end closed the link gracefully.
    #[error("remote closed the link")]
    RemoteClosed,

    /// An exchange exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// No link is established.
    #[error("not connected")]
    NotConnected,

    /// The in-flight operation was cancelled by a disconnect.
    #[error("operation cancelled")]
    Cancelled,

    // ── Session Errors ───────────────────────────────────────────
    /// The session loop is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// An observer is already registered with the session.
    #[error("an observer is already registered")]
    ObserverAlreadyRegistered,

    /// A completion arrived for an operation that is not in flight.
    #[error("stale completion for operation #{0}")]
    StaleCompletion(u64),

    /// A requested state transition is not an edge of the state machine.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    // ── BLE stack ────────────────────────────────────────────────
    /// The Bluetooth stack reported an error.
    #[error("bluetooth: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl LinkError {
    /// Returns `true` when the error describes a graceful link teardown
    /// rather than a failure.
    pub fn is_clean_drop(&self) -> bool {
        matches!(self, Self::RemoteClosed)
    }

    /// Returns `true` for decode errors, which discard a frame but keep
    /// the link up.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooShort { .. } | Self::UnknownVariant { .. } | Self::InvalidModelName
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LinkError {
    fn from(s: String) -> Self {
        LinkError::Other(s)
    }
}

impl From<&str> for LinkError {
    fn from(s: &str) -> Self {
        LinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LinkError::ChannelClosed
    }
}
