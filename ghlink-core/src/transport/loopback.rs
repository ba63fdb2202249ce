//! In-process transport backed by a simulated host.
//!
//! Answers reads with frames produced by the same encoders the real host
//! uses, applies command writes to its mode state, and counts what it is
//! asked to do. A [`LoopbackProbe`] exposes those counters and lets tests
//! inject faults (malformed frames, remote close, link drops).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    report_completion, DropReason, EventSender, Transport, TransportEvent, TransportKind,
};
use crate::codec::{decode_command, encode_info, encode_modes, encode_sensors};
use crate::error::LinkError;
use crate::frame::{Command, FrameKind};
use crate::model::{FanReading, MemoryReading, ModeState, SensorReadings};
use crate::queue::{OperationKind, PendingOperation};

/// Address reported for the simulated device.
pub const LOOPBACK_ADDRESS: &str = "loopback";

/// 32 GiB in KB.
const SIMULATED_MEMORY_KB: i32 = 32 * 1024 * 1024;

/// Loopback transport settings.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub device_model: String,
    /// Whether the radio reports as usable.
    pub available: bool,
    /// Whether scans find the device. When `false` every scan times out.
    pub discoverable: bool,
    /// Skip discovery: the device is already known.
    pub paired: bool,
    pub scan_delay: Duration,
    pub scan_timeout: Duration,
    pub settle_delay: Duration,
    /// Simulated latency of each exchange.
    pub exchange_delay: Duration,
    pub initial_modes: ModeState,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            device_model: "Loopback Model".into(),
            available: true,
            discoverable: true,
            paired: false,
            scan_delay: Duration::from_millis(20),
            scan_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_millis(10),
            exchange_delay: Duration::from_millis(5),
            initial_modes: ModeState::default(),
        }
    }
}

// ── Simulated host ───────────────────────────────────────────────

#[derive(Debug)]
struct SimulatedHost {
    device_model: String,
    modes: ModeState,
    tick: u8,
    sensor_override: Option<Vec<u8>>,
}

impl SimulatedHost {
    fn sample(&mut self) -> SensorReadings {
        self.tick = self.tick.wrapping_add(1);
        let wobble = self.tick % 10;
        SensorReadings {
            cpu_fan: FanReading::new(30 + wobble, 60),
            gpu_fan: FanReading::new(28 + wobble, 60),
            mid_fan: FanReading::new(20 + wobble / 2, 50),
            cpu_temp_c: 55 + wobble,
            gpu_temp_c: 50 + wobble,
            cpu_usage_percent: 10 + wobble * 3,
            gpu_usage_percent: 5 + wobble * 2,
            memory: MemoryReading::new(
                SIMULATED_MEMORY_KB,
                SIMULATED_MEMORY_KB / 2 - i32::from(wobble) * 1024,
            ),
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::SetPerformanceMode(mode) => self.modes.performance = mode,
            Command::SetGpuMode(mode) => self.modes.gpu = mode,
        }
    }
}

#[derive(Debug)]
struct Shared {
    connect_attempts: AtomicUsize,
    scans: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    linked: AtomicBool,
    paired: AtomicBool,
    close_next: AtomicBool,
    executed: Mutex<Vec<u64>>,
    writes: Mutex<Vec<Bytes>>,
    host: Mutex<SimulatedHost>,
    events: Mutex<Option<EventSender>>,
}

impl Shared {
    fn host(&self) -> std::sync::MutexGuard<'_, SimulatedHost> {
        self.host.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, op: &PendingOperation) -> Result<Option<Bytes>, LinkError> {
        if !self.linked.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }
        if self.close_next.swap(false, Ordering::SeqCst) {
            self.linked.store(false, Ordering::SeqCst);
            return Err(LinkError::RemoteClosed);
        }

        let mut host = self.host();
        match &op.kind {
            OperationKind::Read(FrameKind::Info) => {
                Ok(Some(Bytes::from(encode_info(&host.device_model))))
            }
            OperationKind::Read(FrameKind::Modes) => {
                Ok(Some(Bytes::copy_from_slice(&encode_modes(&host.modes))))
            }
            OperationKind::Read(FrameKind::Sensor) => match host.sensor_override.clone() {
                Some(raw) => Ok(Some(Bytes::from(raw))),
                None => {
                    let sample = host.sample();
                    Ok(Some(Bytes::copy_from_slice(&encode_sensors(&sample))))
                }
            },
            OperationKind::Read(FrameKind::Cmd) => Err(LinkError::NotReadable(FrameKind::Cmd)),
            OperationKind::Write(payload) => {
                self.writes
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(payload.clone());
                match decode_command(payload) {
                    Ok(command) => {
                        debug!(%command, "loopback host applied command");
                        host.apply(command);
                    }
                    Err(e) => warn!(error = %e, "loopback host ignored command"),
                }
                Ok(None)
            }
        }
    }
}

// ── Probe ────────────────────────────────────────────────────────

/// Observation and fault-injection handle for a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackProbe {
    shared: Arc<Shared>,
}

impl LoopbackProbe {
    /// Number of link establishment attempts.
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Number of scans started.
    pub fn scans(&self) -> usize {
        self.shared.scans.load(Ordering::SeqCst)
    }

    /// Highest number of exchanges observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    /// Ids of exchanges the host answered, in order. Cancelled ones are
    /// not included.
    pub fn executed(&self) -> Vec<u64> {
        self.shared
            .executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Raw payloads of every write received.
    pub fn writes(&self) -> Vec<Bytes> {
        self.shared
            .writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_linked(&self) -> bool {
        self.shared.linked.load(Ordering::SeqCst)
    }

    /// Current mode state of the simulated host.
    pub fn host_modes(&self) -> ModeState {
        self.shared.host().modes
    }

    /// Answer Sensor reads with `raw` instead of a generated sample.
    pub fn set_sensor_frame(&self, raw: Option<Vec<u8>>) {
        self.shared.host().sensor_override = raw;
    }

    /// Make the next exchange fail as if the host closed the link.
    pub fn close_next_exchange(&self) {
        self.shared.close_next.store(true, Ordering::SeqCst);
    }

    /// Drop an established link from the host side.
    pub async fn drop_link(&self, reason: DropReason) {
        self.shared.linked.store(false, Ordering::SeqCst);
        let events = self
            .shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(events) = events {
            let _ = events.send(TransportEvent::LinkLost(reason)).await;
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

/// Transport whose remote end is a simulated host in this process.
pub struct LoopbackTransport {
    config: LoopbackConfig,
    shared: Arc<Shared>,
    scan_cancel: CancellationToken,
    link_cancel: CancellationToken,
}

impl LoopbackTransport {
    pub fn new(config: LoopbackConfig) -> Self {
        let shared = Arc::new(Shared {
            connect_attempts: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            linked: AtomicBool::new(false),
            paired: AtomicBool::new(config.paired),
            close_next: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            host: Mutex::new(SimulatedHost {
                device_model: config.device_model.clone(),
                modes: config.initial_modes,
                tick: 0,
                sensor_override: None,
            }),
            events: Mutex::new(None),
        });
        Self {
            config,
            shared,
            scan_cancel: CancellationToken::new(),
            link_cancel: CancellationToken::new(),
        }
    }

    pub fn probe(&self) -> LoopbackProbe {
        LoopbackProbe {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    fn has_target(&self) -> bool {
        self.shared.paired.load(Ordering::SeqCst)
    }

    fn supports_discovery(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        self.config.available
    }

    fn start_scan(&mut self, events: EventSender) {
        self.shared.scans.fetch_add(1, Ordering::SeqCst);
        self.scan_cancel = CancellationToken::new();
        let cancel = self.scan_cancel.clone();
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();

        tokio::spawn(async move {
            let event = if config.discoverable {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.scan_delay) => {}
                }
                shared.paired.store(true, Ordering::SeqCst);
                info!(model = %config.device_model, "loopback device found");
                TransportEvent::TargetFound {
                    name: Some(config.device_model),
                    address: LOOPBACK_ADDRESS.into(),
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(config.scan_timeout) => {}
                }
                TransportEvent::ScanTimedOut(config.scan_timeout)
            };
            let _ = events.send(event).await;
        });
    }

    fn stop_scan(&mut self) {
        self.scan_cancel.cancel();
    }

    fn start_connect(&mut self, events: EventSender) {
        self.shared.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.link_cancel = CancellationToken::new();
        *self
            .shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(events.clone());

        let cancel = self.link_cancel.clone();
        let shared = Arc::clone(&self.shared);
        let settle = self.config.settle_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
            shared.linked.store(true, Ordering::SeqCst);
            let _ = events.send(TransportEvent::LinkUp).await;
        });
    }

    fn execute(&mut self, op: PendingOperation, events: EventSender) {
        let cancel = self.link_cancel.clone();
        let shared = Arc::clone(&self.shared);
        let delay = self.config.exchange_delay;

        tokio::spawn(async move {
            let running = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
            shared.max_active.fetch_max(running, Ordering::SeqCst);

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(LinkError::Cancelled),
                _ = tokio::time::sleep(delay) => {
                    let response = shared.respond(&op);
                    shared
                        .executed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(op.id);
                    response
                }
            };

            shared.active.fetch_sub(1, Ordering::SeqCst);
            report_completion(&events, &op, result).await;
        });
    }

    async fn disconnect(&mut self) {
        self.scan_cancel.cancel();
        self.link_cancel.cancel();
        self.shared.linked.store(false, Ordering::SeqCst);
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_info, decode_modes, decode_sensors};
    use crate::frame::PerformanceMode;
    use tokio::sync::mpsc;

    async fn linked() -> (LoopbackTransport, EventSender, mpsc::Receiver<TransportEvent>) {
        let mut transport = LoopbackTransport::new(LoopbackConfig {
            paired: true,
            ..LoopbackConfig::default()
        });
        let (tx, mut rx) = mpsc::channel(8);
        transport.start_connect(tx.clone());
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::LinkUp));
        (transport, tx, rx)
    }

    async fn completion(rx: &mut mpsc::Receiver<TransportEvent>) -> Result<Option<Bytes>, LinkError> {
        match rx.recv().await.unwrap() {
            TransportEvent::Completed { result, .. } => result,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scan_finds_discoverable_device() {
        let mut transport = LoopbackTransport::default();
        assert!(!transport.has_target());

        let (tx, mut rx) = mpsc::channel(4);
        transport.start_scan(tx);
        match rx.recv().await.unwrap() {
            TransportEvent::TargetFound { name, address } => {
                assert_eq!(name.as_deref(), Some("Loopback Model"));
                assert_eq!(address, LOOPBACK_ADDRESS);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(transport.has_target());
        assert_eq!(transport.probe().scans(), 1);
    }

    #[tokio::test]
    async fn hidden_device_times_out() {
        let mut transport = LoopbackTransport::new(LoopbackConfig {
            discoverable: false,
            scan_timeout: Duration::from_millis(30),
            ..LoopbackConfig::default()
        });
        let (tx, mut rx) = mpsc::channel(4);
        transport.start_scan(tx);
        assert!(matches!(
            rx.recv().await.unwrap(),
            TransportEvent::ScanTimedOut(window) if window == Duration::from_millis(30)
        ));
        assert!(!transport.has_target());
    }

    #[tokio::test]
    async fn reads_return_encoded_frames() {
        let (mut transport, tx, mut rx) = linked().await;

        transport.execute(PendingOperation::read(1, FrameKind::Info), tx.clone());
        let info = completion(&mut rx).await.unwrap().unwrap();
        assert_eq!(decode_info(&info).unwrap(), "Loopback Model");

        transport.execute(PendingOperation::read(2, FrameKind::Sensor), tx);
        let sensors = decode_sensors(&completion(&mut rx).await.unwrap().unwrap()).unwrap();
        assert_eq!(sensors.memory.total_kb, SIMULATED_MEMORY_KB);
        assert_eq!(transport.probe().executed(), vec![1, 2]);
    }

    #[tokio::test]
    async fn command_write_updates_host_modes() {
        let (mut transport, tx, mut rx) = linked().await;
        let probe = transport.probe();

        transport.execute(
            PendingOperation::write(1, Bytes::from_static(&[3, 1, 1])),
            tx.clone(),
        );
        assert!(completion(&mut rx).await.unwrap().is_none());
        assert_eq!(probe.host_modes().performance, PerformanceMode::Turbo);

        transport.execute(PendingOperation::read(2, FrameKind::Modes), tx);
        let modes = decode_modes(&completion(&mut rx).await.unwrap().unwrap()).unwrap();
        assert_eq!(modes.performance, PerformanceMode::Turbo);
        assert_eq!(probe.writes()[0].as_ref(), &[3, 1, 1]);
    }

    #[tokio::test]
    async fn close_next_exchange_reports_remote_closed() {
        let (mut transport, tx, mut rx) = linked().await;
        let probe = transport.probe();
        probe.close_next_exchange();

        transport.execute(PendingOperation::read(1, FrameKind::Modes), tx);
        assert!(matches!(completion(&mut rx).await, Err(LinkError::RemoteClosed)));
        assert!(!probe.is_linked());
    }

    #[tokio::test]
    async fn disconnect_cancels_in_flight_exchange() {
        let mut transport = LoopbackTransport::new(LoopbackConfig {
            paired: true,
            exchange_delay: Duration::from_secs(5),
            ..LoopbackConfig::default()
        });
        let (tx, mut rx) = mpsc::channel(4);
        transport.start_connect(tx.clone());
        assert!(matches!(rx.recv().await.unwrap(), TransportEvent::LinkUp));

        transport.execute(PendingOperation::read(9, FrameKind::Sensor), tx);
        transport.disconnect().await;
        assert!(matches!(completion(&mut rx).await, Err(LinkError::Cancelled)));
        assert!(!transport.probe().is_linked());
    }
}
