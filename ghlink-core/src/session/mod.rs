//! Session orchestration.
//!
//! A [`Session`] is a single spawned task that owns one [`Transport`], the
//! [`CommandQueue`], the [`ConnectionState`] and the latest
//! [`DeviceSnapshot`]. Callers talk to it through a cloneable
//! [`SessionHandle`]; transports report back on a bounded event channel.
//! Both inputs are drained by one `select!` loop, so state transitions,
//! snapshot replacement and observer notifications never interleave.
//!
//! Every scan, connect attempt and teardown opens a fresh event channel.
//! Events a transport task reports for an earlier attempt land in a channel
//! nobody reads and never reach the state machine.
//!
//! ```text
//!  SessionHandle ──SessionCommand──►┐
//!                                   ├──► Session loop ──► CommandQueue ──► Transport
//!  Transport tasks ─TransportEvent─►┘         │
//!                                             ├──► watch: ConnectionState / DeviceSnapshot
//!                                             └──► SessionObserver
//! ```

pub mod observer;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{decode_frame, encode_command, Frame};
use crate::error::LinkError;
use crate::frame::{Command, FrameKind, GpuMode, PerformanceMode};
use crate::model::DeviceSnapshot;
use crate::queue::{CommandQueue, PendingOperation};
use crate::state::ConnectionState;
use crate::transport::{DropReason, EventSender, Transport, TransportEvent, TransportKind};

pub use observer::{ChannelObserver, SessionEvent, SessionObserver};
use observer::ObserverSlot;

/// Session channel sizing.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the transport event channel.
    pub event_capacity: usize,
    /// Capacity of the handle command channel.
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_capacity: 64,
            command_capacity: 32,
        }
    }
}

/// Requests sent from a [`SessionHandle`] to the session loop.
enum SessionCommand {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Read(FrameKind),
    Write(Command),
    RegisterObserver(
        Box<dyn SessionObserver>,
        oneshot::Sender<Result<(), LinkError>>,
    ),
    UnregisterObserver(oneshot::Sender<bool>),
    Available(oneshot::Sender<bool>),
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable front end of a running [`Session`].
///
/// Every operation returns as soon as the request is handed to the session
/// loop. Results arrive as state changes and decoded frames, observed via
/// the registered [`SessionObserver`] or the watch channels. Operations only
/// fail when the session task is gone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<Arc<DeviceSnapshot>>,
    kind: TransportKind,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), LinkError> {
        self.commands.send(command).await?;
        Ok(())
    }

    /// Start scanning or connecting, depending on whether a target is
    /// already known.
    pub async fn connect(&self) -> Result<(), LinkError> {
        self.send(SessionCommand::Connect).await
    }

    /// Stop any scan, drop queued operations, tear down the link and settle
    /// in a terminal state. Resolves once the teardown finished.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Disconnect(tx)).await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    pub async fn read_info(&self) -> Result<(), LinkError> {
        self.send(SessionCommand::Read(FrameKind::Info)).await
    }

    pub async fn read_modes(&self) -> Result<(), LinkError> {
        self.send(SessionCommand::Read(FrameKind::Modes)).await
    }

    pub async fn read_sensors(&self) -> Result<(), LinkError> {
        self.send(SessionCommand::Read(FrameKind::Sensor)).await
    }

    /// Fire-and-forget; follow with [`read_modes`](Self::read_modes) to
    /// observe the confirmed mode.
    pub async fn set_performance_mode(&self, mode: PerformanceMode) -> Result<(), LinkError> {
        self.send(SessionCommand::Write(Command::SetPerformanceMode(mode)))
            .await
    }

    /// Fire-and-forget; follow with [`read_modes`](Self::read_modes) to
    /// observe the confirmed mode.
    pub async fn set_gpu_mode(&self, mode: GpuMode) -> Result<(), LinkError> {
        self.send(SessionCommand::Write(Command::SetGpuMode(mode)))
            .await
    }

    /// Register the single observer. Fails with
    /// [`LinkError::ObserverAlreadyRegistered`] while another is registered.
    pub async fn register_observer(
        &self,
        observer: Box<dyn SessionObserver>,
    ) -> Result<(), LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::RegisterObserver(observer, tx))
            .await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)?
    }

    /// Remove the observer. Returns `true` if one was registered.
    pub async fn unregister_observer(&self) -> Result<bool, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::UnregisterObserver(tx)).await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Whether the transport's radio / network is usable at all.
    pub async fn transport_available(&self) -> Result<bool, LinkError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Available(tx)).await?;
        rx.await.map_err(|_| LinkError::ChannelClosed)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<DeviceSnapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe_snapshot(&self) -> watch::Receiver<Arc<DeviceSnapshot>> {
        self.snapshot.clone()
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.kind
    }
}

// ── Session ──────────────────────────────────────────────────────

/// The session loop state. Lives inside the task spawned by
/// [`Session::spawn`].
pub struct Session {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    queue: CommandQueue,
    snapshot: Arc<DeviceSnapshot>,
    observer: ObserverSlot,
    event_capacity: usize,
    events_tx: EventSender,
    events_rx: mpsc::Receiver<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Arc<DeviceSnapshot>>,
}

impl Session {
    /// Spawn the session loop for `transport`.
    ///
    /// The loop runs until every [`SessionHandle`] is dropped; it then
    /// tears the transport down and exits.
    pub fn spawn(
        transport: Box<dyn Transport>,
        config: SessionConfig,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::None);
        let snapshot = Arc::new(DeviceSnapshot::default());
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::clone(&snapshot));

        let handle = SessionHandle {
            commands: commands_tx,
            state: state_rx,
            snapshot: snapshot_rx,
            kind: transport.kind(),
        };

        let session = Session {
            transport,
            state: ConnectionState::None,
            queue: CommandQueue::new(),
            snapshot,
            observer: ObserverSlot::default(),
            event_capacity: config.event_capacity,
            events_tx,
            events_rx,
            state_tx,
            snapshot_tx,
        };
        let task = tokio::spawn(session.run(commands_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        info!(transport = %self.transport.kind(), "session started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
            }
        }
        self.queue.clear();
        self.transport.stop_scan();
        self.transport.disconnect().await;
        info!("session stopped");
    }

    // ── Notifications ────────────────────────────────────────────

    fn publish_state(&self) {
        info!(state = %self.state, "connection state");
        self.state_tx.send_replace(self.state);
        self.observer.connection_changed(self.state);
    }

    /// Replace the event channel. Events still queued or in transit from
    /// the previous attempt are dropped with the old receiver.
    fn renew_events(&mut self) -> EventSender {
        let (tx, rx) = mpsc::channel(self.event_capacity);
        self.events_tx = tx.clone();
        self.events_rx = rx;
        tx
    }

    fn publish_frame(&mut self, frame: Frame) {
        let kind = frame.kind();
        let next = match frame {
            Frame::Info(model) => self.snapshot.with_device_model(model),
            Frame::Modes(modes) => self.snapshot.with_modes(modes),
            Frame::Sensor(sensors) => self.snapshot.with_sensors(sensors),
        };
        self.snapshot = Arc::new(next);
        self.snapshot_tx.send_replace(Arc::clone(&self.snapshot));
        self.observer.frame_decoded(kind, &self.snapshot);
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect => self.connect(),
            SessionCommand::Disconnect(done) => {
                self.disconnect().await;
                let _ = done.send(());
            }
            SessionCommand::Read(kind) => {
                let id = self.queue.next_id();
                self.submit(PendingOperation::read(id, kind));
            }
            SessionCommand::Write(command) => {
                let id = self.queue.next_id();
                let payload = Bytes::copy_from_slice(&encode_command(&command));
                debug!(%command, "command write");
                self.submit(PendingOperation::write(id, payload));
            }
            SessionCommand::RegisterObserver(observer, reply) => {
                let _ = reply.send(self.observer.register(observer));
            }
            SessionCommand::UnregisterObserver(reply) => {
                let _ = reply.send(self.observer.unregister());
            }
            SessionCommand::Available(reply) => {
                let _ = reply.send(self.transport.is_available().await);
            }
        }
    }

    fn connect(&mut self) {
        if !self.state.is_idle() {
            debug!(state = %self.state, "connect ignored: attempt or link in progress");
            return;
        }

        if self.transport.has_target() {
            self.begin_connect();
        } else if self.transport.supports_discovery() {
            if self.state.begin_scan().is_ok() {
                self.publish_state();
                let events = self.renew_events();
                self.transport.start_scan(events);
            }
        } else {
            warn!(transport = %self.transport.kind(), "connect failed: no target configured");
            self.state.fail();
            self.publish_state();
        }
    }

    fn begin_connect(&mut self) {
        match self.state.begin_connect() {
            Ok(()) => {
                self.queue.clear();
                self.publish_state();
                let events = self.renew_events();
                self.transport.start_connect(events);
            }
            Err(e) => debug!(error = %e, "connect ignored"),
        }
    }

    /// Stop scan, clear queue, tear down, then settle.
    async fn disconnect(&mut self) {
        self.transport.stop_scan();
        self.renew_events();
        if self.state == ConnectionState::Scanning {
            self.queue.clear();
            if self.state.end_scan().is_ok() {
                self.publish_state();
            }
            return;
        }

        self.queue.clear();
        match self.state.begin_disconnect() {
            Ok(()) => {
                self.publish_state();
                self.transport.disconnect().await;
                if self.state.finish_disconnect().is_ok() {
                    self.publish_state();
                }
            }
            Err(_) => {
                // Already idle; still release anything the transport holds.
                self.transport.disconnect().await;
                debug!(state = %self.state, "disconnect: nothing to tear down");
            }
        }
    }

    /// Queue an operation; dispatch it if nothing is in flight.
    fn submit(&mut self, op: PendingOperation) {
        if !self.state.is_connected() {
            debug!(op = %op, state = %self.state, "operation dropped: not connected");
            return;
        }
        match self.queue.enqueue(op) {
            Some(next) => self.dispatch(next),
            None => debug!(in_flight = ?self.queue.in_flight(), "operation queued"),
        }
    }

    fn dispatch(&mut self, op: PendingOperation) {
        debug!(op = %op, "dispatch");
        self.transport.execute(op, self.events_tx.clone());
    }

    // ── Transport events ─────────────────────────────────────────

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::TargetFound { name, address } => {
                if self.state.complete_scan().is_err() {
                    debug!(%address, state = %self.state, "stale scan result ignored");
                    return;
                }
                info!(?name, %address, "target found");
                self.publish_state();
                self.begin_connect();
            }
            TransportEvent::ScanTimedOut(window) => {
                if self.state.end_scan().is_ok() {
                    info!(reason = %LinkError::ScanTimeout(window), "scan ended without a match");
                    self.publish_state();
                }
            }
            TransportEvent::ScanFailed(e) => {
                if self.state == ConnectionState::Scanning {
                    warn!(error = %e, "scan failed");
                    self.state.fail();
                    self.publish_state();
                } else {
                    debug!(error = %e, "stale scan failure ignored");
                }
            }
            TransportEvent::LinkUp => {
                if self.state.complete_connect().is_err() {
                    debug!(state = %self.state, "stale link-up ignored");
                    return;
                }
                self.queue.clear();
                self.publish_state();
                let id = self.queue.next_id();
                self.submit(PendingOperation::read(id, FrameKind::Info));
            }
            TransportEvent::LinkFailed(e) => {
                if self.state != ConnectionState::Connecting {
                    debug!(error = %e, "stale link failure ignored");
                    return;
                }
                warn!(error = %e, "link failed");
                self.queue.clear();
                self.state.fail();
                self.publish_state();
            }
            TransportEvent::LinkLost(reason) => self.link_lost(reason),
            TransportEvent::Completed { id, kind, result } => {
                self.completed(id, kind, result).await;
            }
        }
    }

    fn link_lost(&mut self, reason: DropReason) {
        let cleared = self.queue.clear();
        match self.state.drop_link(reason.is_clean()) {
            Ok(()) => {
                match reason {
                    DropReason::Clean => info!(cleared, "link closed"),
                    DropReason::Abnormal(code) => {
                        warn!(error = %LinkError::AbnormalDrop(code), cleared, "link lost")
                    }
                }
                self.renew_events();
                self.publish_state();
            }
            Err(_) => debug!(?reason, state = %self.state, "stale link loss ignored"),
        }
    }

    async fn completed(
        &mut self,
        id: u64,
        kind: FrameKind,
        result: Result<Option<Bytes>, LinkError>,
    ) {
        let next = match self.queue.complete(id) {
            Ok(next) => next,
            Err(e) => {
                debug!(error = %e, "late completion ignored");
                return;
            }
        };

        match result {
            Ok(Some(raw)) => match decode_frame(kind, &raw) {
                Ok(frame) => {
                    debug!(%kind, len = raw.len(), "frame decoded");
                    self.publish_frame(frame);
                }
                Err(e) if e.is_decode_error() => {
                    warn!(%kind, error = %e, "frame discarded");
                    self.observer.frame_discarded(kind);
                }
                Err(e) => {
                    self.operation_failed(kind, e).await;
                    return;
                }
            },
            Ok(None) => debug!(%kind, "write completed"),
            Err(LinkError::Cancelled) => {
                debug!(%kind, "operation cancelled");
            }
            Err(e) => {
                self.operation_failed(kind, e).await;
                return;
            }
        }

        if let Some(next) = next {
            if self.state.is_connected() {
                self.dispatch(next);
            } else {
                self.queue.clear();
            }
        }
    }

    /// An exchange failed on an established link: close it and report.
    async fn operation_failed(&mut self, kind: FrameKind, error: LinkError) {
        let clean = error.is_clean_drop();
        if clean {
            info!(%kind, "remote closed the link");
        } else {
            warn!(%kind, error = %error, "operation failed");
        }
        self.queue.clear();
        self.transport.disconnect().await;
        self.renew_events();
        match self.state.drop_link(clean) {
            Ok(()) => self.publish_state(),
            Err(_) => debug!(state = %self.state, "operation failure after link teardown"),
        }
    }
}
