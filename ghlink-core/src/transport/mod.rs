//! Transport adapters.
//!
//! A [`Transport`] owns the physical link to the remote host. Every
//! long-running step (scan, connect, settle delay, each exchange) runs in a
//! spawned task that reports back with a [`TransportEvent`] on the bounded
//! event channel the session hands in. Trait methods themselves return
//! immediately, except the async teardown and availability probe.
//!
//! ```text
//!  Session ──start_scan / start_connect / execute──► Transport ──spawn──► I/O task
//!     ▲                                                                     │
//!     └──────────────────────── TransportEvent (mpsc) ◄─────────────────────┘
//! ```

pub mod ble;
pub mod loopback;
pub mod socket;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::frame::FrameKind;
use crate::queue::PendingOperation;

pub use ble::{BleConfig, BleTransport};
pub use loopback::{LoopbackConfig, LoopbackProbe, LoopbackTransport};
pub use socket::{SocketConfig, SocketTransport};

// ── TransportKind ────────────────────────────────────────────────

/// Which adapter a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bluetooth-LE GATT.
    Ble,
    /// Raw TCP socket.
    #[default]
    Socket,
    /// In-process simulated host.
    Loopback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "ble"),
            TransportKind::Socket => write!(f, "socket"),
            TransportKind::Loopback => write!(f, "loopback"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ble" | "bluetooth" => Ok(TransportKind::Ble),
            "socket" | "tcp" | "wifi" => Ok(TransportKind::Socket),
            "loopback" | "mock" => Ok(TransportKind::Loopback),
            other => Err(LinkError::Other(format!("unknown transport: {other}"))),
        }
    }
}

// ── Events ───────────────────────────────────────────────────────

/// Why an established link went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Graceful close by either side.
    Clean,
    /// The stack reported a non-success status code.
    Abnormal(i32),
}

impl DropReason {
    pub fn is_clean(&self) -> bool {
        matches!(self, DropReason::Clean)
    }
}

/// Low-level events emitted by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A scan found an advertisement carrying the target service.
    TargetFound {
        name: Option<String>,
        address: String,
    },
    /// The scan window elapsed without a match.
    ScanTimedOut(Duration),
    /// The platform scan API failed.
    ScanFailed(LinkError),
    /// Link established, handshake done, settle delay elapsed.
    LinkUp,
    /// Link establishment or handshake failed.
    LinkFailed(LinkError),
    /// An established link went away.
    LinkLost(DropReason),
    /// The operation `id` finished. Reads carry the raw response bytes.
    Completed {
        id: u64,
        kind: FrameKind,
        result: Result<Option<Bytes>, LinkError>,
    },
}

/// Sending half of the session's event channel.
pub type EventSender = mpsc::Sender<TransportEvent>;

/// Report an operation completion; a closed channel means the session is
/// gone and the result has no reader.
pub(crate) async fn report_completion(
    events: &EventSender,
    op: &PendingOperation,
    result: Result<Option<Bytes>, LinkError>,
) {
    let _ = events
        .send(TransportEvent::Completed {
            id: op.id,
            kind: op.frame_kind(),
            result,
        })
        .await;
}

// ── Transport ────────────────────────────────────────────────────

/// Capability interface implemented by every adapter.
///
/// The session never branches on the concrete adapter; it only uses
/// these methods.
#[async_trait]
pub trait Transport: Send {
    /// Which adapter this is.
    fn kind(&self) -> TransportKind;

    /// Whether a connect can go straight to link establishment (cached
    /// device or configured address).
    fn has_target(&self) -> bool;

    /// Whether the adapter can discover a target by scanning.
    fn supports_discovery(&self) -> bool;

    /// Whether the underlying radio / network is usable at all.
    async fn is_available(&self) -> bool;

    /// Start scanning for the target. Reports `TargetFound`,
    /// `ScanTimedOut` or `ScanFailed`.
    fn start_scan(&mut self, events: EventSender);

    /// Stop a scan in progress. No event is reported.
    fn stop_scan(&mut self);

    /// Start establishing the link. Reports `LinkUp` or `LinkFailed`,
    /// later `LinkLost` if the link drops.
    fn start_connect(&mut self, events: EventSender);

    /// Issue exactly one operation. Reports `Completed` for `op.id`.
    ///
    /// The caller guarantees no other operation is in flight.
    fn execute(&mut self, op: PendingOperation, events: EventSender);

    /// Cancel any in-flight work and tear the link down.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_kind_parse_and_display() {
        assert_eq!("BLE".parse::<TransportKind>().unwrap(), TransportKind::Ble);
        assert_eq!("tcp".parse::<TransportKind>().unwrap(), TransportKind::Socket);
        assert_eq!("mock".parse::<TransportKind>().unwrap(), TransportKind::Loopback);
        assert!("serial".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Loopback.to_string(), "loopback");
    }

    #[test]
    fn drop_reason_classification() {
        assert!(DropReason::Clean.is_clean());
        assert!(!DropReason::Abnormal(19).is_clean());
    }
}
