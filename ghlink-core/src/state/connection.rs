//! Session connection state machine.
//!
//! Provides a `ConnectionState` enum that models the full lifecycle of a
//! link to the remote host, with validated transitions that return
//! `Result` instead of panicking.

use std::fmt;

use serde::Serialize;

use crate::error::LinkError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of the session's link.
///
/// ```text
///   None/Disconnected/Error ──► Scanning ──► ScanCompleted ──► Connecting ──► Connected
///          ▲   │                   │                             │  ▲            │
///          │   └───────────────────┼─────────────────────────────┘  │            │
///          │                       ▼ timeout / cancel               │ (target    │
///          ├────────────────────── None                             │  known)    │
///          │                                                        │            ▼
///          └─────── Disconnected ◄── Disconnecting ◄────────────────┴──── disconnect()
/// ```
///
/// Any failure moves to `Error`; an unexpected clean drop from
/// `Connected` moves to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ConnectionState {
    /// Never connected, or returned to idle after a clean drop / scan timeout.
    #[default]
    None,

    /// Looking for an advertisement carrying the target service.
    Scanning,

    /// A matching advertisement was found; a connect follows immediately.
    ScanCompleted,

    /// Link establishment and discovery in progress.
    Connecting,

    /// Link up, characteristics resolved, settle delay elapsed.
    Connected,

    /// Explicit teardown in progress.
    Disconnecting,

    /// Explicit teardown finished.
    Disconnected,

    /// The last attempt or link failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Scanning => write!(f, "Scanning"),
            Self::ScanCompleted => write!(f, "ScanCompleted"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

impl ConnectionState {
    /// Returns `true` when the link is up and operations may run.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns `true` when `connect()` may start a new attempt.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::None | Self::Disconnected | Self::Error)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Scanning`.
    ///
    /// Valid from: `None`, `Disconnected`, `Error`.
    pub fn begin_scan(&mut self) -> Result<(), LinkError> {
        if self.is_idle() {
            *self = Self::Scanning;
            Ok(())
        } else {
            Err(LinkError::InvalidTransition("cannot scan: not idle"))
        }
    }

    /// Transition to `ScanCompleted`.
    ///
    /// Valid from: `Scanning`.
    pub fn complete_scan(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Scanning => {
                *self = Self::ScanCompleted;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot complete scan: not scanning",
            )),
        }
    }

    /// Return to `None` because the scan window elapsed or the scan was
    /// cancelled.
    ///
    /// Valid from: `Scanning`.
    pub fn end_scan(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Scanning => {
                *self = Self::None;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition("cannot end scan: not scanning")),
        }
    }

    /// Transition to `Connecting`.
    ///
    /// Valid from: `None`, `Disconnected`, `Error`, `ScanCompleted`.
    pub fn begin_connect(&mut self) -> Result<(), LinkError> {
        if self.is_idle() || matches!(self, Self::ScanCompleted) {
            *self = Self::Connecting;
            Ok(())
        } else {
            Err(LinkError::InvalidTransition(
                "cannot connect: not idle or scan-completed",
            ))
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot complete connect: not connecting",
            )),
        }
    }

    /// The transport reported the link went away.
    ///
    /// From `Connected` a clean drop lands in `None` and an abnormal one in
    /// `Error`. A drop while `Connecting` is a link failure (`Error`).
    pub fn drop_link(&mut self, clean: bool) -> Result<(), LinkError> {
        match self {
            Self::Connected => {
                *self = if clean { Self::None } else { Self::Error };
                Ok(())
            }
            Self::Connecting => {
                *self = Self::Error;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition("cannot drop: no link")),
        }
    }

    /// Transition to `Disconnecting`.
    ///
    /// Valid from: `ScanCompleted`, `Connecting`, `Connected`.
    pub fn begin_disconnect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::ScanCompleted | Self::Connecting | Self::Connected => {
                *self = Self::Disconnecting;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot disconnect: no link or attempt in progress",
            )),
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Valid from: `Disconnecting`.
    pub fn finish_disconnect(&mut self) -> Result<(), LinkError> {
        match self {
            Self::Disconnecting => {
                *self = Self::Disconnected;
                Ok(())
            }
            _ => Err(LinkError::InvalidTransition(
                "cannot finish disconnect: not disconnecting",
            )),
        }
    }

    /// Force `Error` regardless of current state.
    ///
    /// Use this for unrecoverable failures (scan API error, handshake
    /// incomplete, I/O failure mid-exchange).
    pub fn fail(&mut self) {
        *self = Self::Error;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_then_connect_lifecycle() {
        let mut state = ConnectionState::None;

        state.begin_scan().unwrap();
        assert_eq!(state, ConnectionState::Scanning);

        state.complete_scan().unwrap();
        assert_eq!(state, ConnectionState::ScanCompleted);

        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        state.complete_connect().unwrap();
        assert!(state.is_connected());

        state.begin_disconnect().unwrap();
        assert_eq!(state, ConnectionState::Disconnecting);

        state.finish_disconnect().unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(state.is_idle());
    }

    #[test]
    fn direct_connect_from_idle_states() {
        for start in [
            ConnectionState::None,
            ConnectionState::Disconnected,
            ConnectionState::Error,
        ] {
            let mut state = start;
            state.begin_connect().unwrap();
            assert_eq!(state, ConnectionState::Connecting);
        }
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut state = ConnectionState::Connected;
        assert!(state.begin_connect().is_err());
        assert!(state.begin_scan().is_err());
        assert!(state.is_connected());
    }

    #[test]
    fn invalid_transition_complete_connect_from_scanning() {
        let mut state = ConnectionState::Scanning;
        assert!(state.complete_connect().is_err());
        assert_eq!(state, ConnectionState::Scanning);
    }

    #[test]
    fn scan_timeout_returns_to_none() {
        let mut state = ConnectionState::Scanning;
        state.end_scan().unwrap();
        assert_eq!(state, ConnectionState::None);
        assert!(state.end_scan().is_err());
    }

    #[test]
    fn clean_and_abnormal_drops() {
        let mut state = ConnectionState::Connected;
        state.drop_link(true).unwrap();
        assert_eq!(state, ConnectionState::None);

        let mut state = ConnectionState::Connected;
        state.drop_link(false).unwrap();
        assert_eq!(state, ConnectionState::Error);

        let mut state = ConnectionState::Connecting;
        state.drop_link(true).unwrap();
        assert_eq!(state, ConnectionState::Error);

        let mut state = ConnectionState::None;
        assert!(state.drop_link(true).is_err());
    }

    #[test]
    fn disconnect_not_valid_from_idle() {
        let mut state = ConnectionState::Disconnected;
        assert!(state.begin_disconnect().is_err());
        let mut state = ConnectionState::Scanning;
        assert!(state.begin_disconnect().is_err());
    }

    #[test]
    fn fail_from_any_state() {
        let mut state = ConnectionState::Scanning;
        state.fail();
        assert_eq!(state, ConnectionState::Error);
        assert!(state.is_idle());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::None.to_string(), "None");
        assert_eq!(ConnectionState::ScanCompleted.to_string(), "ScanCompleted");
        assert_eq!(ConnectionState::Error.to_string(), "Error");
    }

    #[test]
    fn default_state_is_none() {
        assert_eq!(ConnectionState::default(), ConnectionState::None);
    }
}
