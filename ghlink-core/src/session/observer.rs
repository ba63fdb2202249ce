//! Session notifications.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::frame::FrameKind;
use crate::model::DeviceSnapshot;
use crate::state::ConnectionState;

/// Receives session notifications.
///
/// Callbacks run on the session task, one at a time and in the order the
/// changes happened. They must return quickly; hand anything slow to
/// another task.
pub trait SessionObserver: Send + Sync {
    /// The connection state changed.
    fn on_connection_changed(&self, state: ConnectionState);

    /// A frame of `kind` was decoded; `snapshot` already includes it.
    fn on_frame_decoded(&self, kind: FrameKind, snapshot: &DeviceSnapshot);

    /// A response of `kind` arrived but did not decode; the snapshot is
    /// unchanged and the link stays up.
    fn on_frame_discarded(&self, _kind: FrameKind) {}
}

/// A notification as a value, for observers that forward to a channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    FrameDecoded(FrameKind, Arc<DeviceSnapshot>),
    FrameDiscarded(FrameKind),
}

/// Observer that forwards every notification into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SessionObserver for ChannelObserver {
    fn on_connection_changed(&self, state: ConnectionState) {
        let _ = self.tx.send(SessionEvent::ConnectionChanged(state));
    }

    fn on_frame_decoded(&self, kind: FrameKind, snapshot: &DeviceSnapshot) {
        let _ = self
            .tx
            .send(SessionEvent::FrameDecoded(kind, Arc::new(snapshot.clone())));
    }

    fn on_frame_discarded(&self, kind: FrameKind) {
        let _ = self.tx.send(SessionEvent::FrameDiscarded(kind));
    }
}

/// Holds at most one observer.
#[derive(Default)]
pub(crate) struct ObserverSlot {
    observer: Option<Box<dyn SessionObserver>>,
}

impl ObserverSlot {
    pub(crate) fn register(&mut self, observer: Box<dyn SessionObserver>) -> Result<(), LinkError> {
        if self.observer.is_some() {
            return Err(LinkError::ObserverAlreadyRegistered);
        }
        self.observer = Some(observer);
        Ok(())
    }

    /// Returns `true` when an observer was removed.
    pub(crate) fn unregister(&mut self) -> bool {
        self.observer.take().is_some()
    }

    pub(crate) fn connection_changed(&self, state: ConnectionState) {
        if let Some(observer) = &self.observer {
            observer.on_connection_changed(state);
        }
    }

    pub(crate) fn frame_decoded(&self, kind: FrameKind, snapshot: &DeviceSnapshot) {
        if let Some(observer) = &self.observer {
            observer.on_frame_decoded(kind, snapshot);
        }
    }

    pub(crate) fn frame_discarded(&self, kind: FrameKind) {
        if let Some(observer) = &self.observer {
            observer.on_frame_discarded(kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_accepts_a_single_observer() {
        let mut slot = ObserverSlot::default();
        let (first, _rx1) = ChannelObserver::new();
        let (second, _rx2) = ChannelObserver::new();

        slot.register(Box::new(first)).unwrap();
        assert!(matches!(
            slot.register(Box::new(second)),
            Err(LinkError::ObserverAlreadyRegistered)
        ));
        assert!(slot.unregister());
        assert!(!slot.unregister());
    }

    #[test]
    fn notifications_reach_registered_observer_only() {
        let mut slot = ObserverSlot::default();
        slot.connection_changed(ConnectionState::Scanning);

        let (observer, mut rx) = ChannelObserver::new();
        slot.register(Box::new(observer)).unwrap();
        slot.connection_changed(ConnectionState::Connected);
        slot.frame_decoded(FrameKind::Info, &DeviceSnapshot::default());
        slot.frame_discarded(FrameKind::Modes);

        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::ConnectionChanged(ConnectionState::Connected)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::FrameDecoded(FrameKind::Info, _)
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::FrameDiscarded(FrameKind::Modes)
        ));
        assert!(rx.try_recv().is_err());

        slot.unregister();
        slot.connection_changed(ConnectionState::None);
        assert!(rx.try_recv().is_err());
    }
}
