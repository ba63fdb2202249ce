//! Periodic telemetry polling.
//!
//! Each cycle enqueues a Sensor read then a Modes read. A new cycle only
//! starts once the previous cycle's Modes response arrived (decoded or
//! discarded) or the link state changed, so a stalled link never
//! accumulates queued reads.

use tracing::debug;

use ghlink_core::{ConnectionState, FrameKind, LinkError, SessionEvent, SessionHandle};

#[derive(Debug, Default)]
pub struct Poller {
    connected: bool,
    awaiting_cycle: bool,
    skipped: u64,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a session notification.
    pub fn observe(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::ConnectionChanged(state) => {
                self.connected = *state == ConnectionState::Connected;
                self.awaiting_cycle = false;
            }
            SessionEvent::FrameDecoded(FrameKind::Modes, _)
            | SessionEvent::FrameDiscarded(FrameKind::Modes) => self.awaiting_cycle = false,
            SessionEvent::FrameDecoded(..) | SessionEvent::FrameDiscarded(_) => {}
        }
    }

    /// Claim the next cycle. Returns `false` while disconnected or while
    /// the previous cycle is still outstanding.
    pub fn begin_cycle(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        if self.awaiting_cycle {
            self.skipped += 1;
            debug!(skipped = self.skipped, "poll skipped: previous cycle outstanding");
            return false;
        }
        self.awaiting_cycle = true;
        true
    }

    /// Run one tick against `session`. Returns whether a cycle was issued.
    pub async fn tick(&mut self, session: &SessionHandle) -> Result<bool, LinkError> {
        if !self.begin_cycle() {
            return Ok(false);
        }
        session.read_sensors().await?;
        session.read_modes().await?;
        Ok(true)
    }

    /// Ticks skipped because a cycle was outstanding.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ghlink_core::DeviceSnapshot;

    fn modes_decoded() -> SessionEvent {
        SessionEvent::FrameDecoded(FrameKind::Modes, Arc::new(DeviceSnapshot::default()))
    }

    #[test]
    fn idle_until_connected() {
        let mut poller = Poller::new();
        assert!(!poller.begin_cycle());

        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(poller.begin_cycle());
    }

    #[test]
    fn waits_for_modes_before_next_cycle() {
        let mut poller = Poller::new();
        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(poller.begin_cycle());

        // Sensor alone does not finish the cycle.
        poller.observe(&SessionEvent::FrameDecoded(
            FrameKind::Sensor,
            Arc::new(DeviceSnapshot::default()),
        ));
        assert!(!poller.begin_cycle());
        assert!(!poller.begin_cycle());
        assert_eq!(poller.skipped(), 2);

        poller.observe(&modes_decoded());
        assert!(poller.begin_cycle());
    }

    #[test]
    fn discarded_modes_frame_ends_cycle() {
        let mut poller = Poller::new();
        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(poller.begin_cycle());

        poller.observe(&SessionEvent::FrameDiscarded(FrameKind::Sensor));
        assert!(!poller.begin_cycle());

        poller.observe(&SessionEvent::FrameDiscarded(FrameKind::Modes));
        assert!(poller.begin_cycle());
    }

    #[test]
    fn state_change_releases_stalled_cycle() {
        let mut poller = Poller::new();
        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(poller.begin_cycle());

        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Error));
        assert!(!poller.begin_cycle());

        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(poller.begin_cycle());
    }

    #[tokio::test]
    async fn tick_issues_reads_against_session() {
        use ghlink_core::{LoopbackConfig, LoopbackTransport, Session, SessionConfig};

        let transport = LoopbackTransport::new(LoopbackConfig {
            paired: true,
            ..LoopbackConfig::default()
        });
        let probe = transport.probe();
        let (handle, _task) = Session::spawn(Box::new(transport), SessionConfig::default());
        let mut states = handle.subscribe_state();
        handle.connect().await.unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();

        let mut poller = Poller::new();
        poller.observe(&SessionEvent::ConnectionChanged(ConnectionState::Connected));
        assert!(tokio_test::assert_ok!(poller.tick(&handle).await));
        assert!(!poller.tick(&handle).await.unwrap());

        let mut snapshots = handle.subscribe_snapshot();
        snapshots
            .wait_for(|s| s.sensors.memory.total_kb > 0)
            .await
            .unwrap();
        assert!(probe.executed().len() >= 2);
    }

    #[tokio::test]
    async fn polling_resumes_after_undecodable_modes_frame() {
        use std::time::Duration;

        use ghlink_core::{
            ChannelObserver, GpuMode, Session, SessionConfig, SocketConfig, SocketTransport,
        };
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;
        use tokio::time::timeout;

        // First Modes reply carries an unknown GPU mode byte.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut bad_modes = true;
            let mut code = [0u8; 1];
            while socket.read_exact(&mut code).await.is_ok() {
                let reply: &[u8] = match code[0] {
                    0 => &[4, b'T', b'e', b's', b't'],
                    1 if bad_modes => {
                        bad_modes = false;
                        &[0, 7]
                    }
                    1 => &[0, 1],
                    2 => &[10, 20, 5, 100, 100, 100, 45, 60, 30, 55, 0, 8, 0, 0, 0, 4, 0, 0],
                    _ => return,
                };
                if socket.write_all(reply).await.is_err() {
                    return;
                }
            }
        });

        let transport = SocketTransport::new(SocketConfig::new("127.0.0.1", port));
        let (handle, _task) = Session::spawn(Box::new(transport), SessionConfig::default());
        let (observer, mut events) = ChannelObserver::new();
        handle.register_observer(Box::new(observer)).await.unwrap();
        handle.connect().await.unwrap();

        let mut poller = Poller::new();
        let mut cycles = 0;
        let mut discarded = false;
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("session gone");
                poller.observe(&event);
                match &event {
                    SessionEvent::FrameDiscarded(FrameKind::Modes) => discarded = true,
                    SessionEvent::FrameDecoded(FrameKind::Modes, snapshot) => {
                        assert!(discarded);
                        assert_eq!(snapshot.modes.gpu, GpuMode::Standard);
                        return;
                    }
                    _ => {}
                }
                if poller.tick(&handle).await.unwrap() {
                    cycles += 1;
                }
            }
        })
        .await
        .expect("polling stalled after a discarded frame");

        assert_eq!(cycles, 2);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }
}
