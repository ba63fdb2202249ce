//! Bluetooth-LE GATT transport.
//!
//! One primary service carries four characteristics, one per frame kind.
//! A read is a GATT characteristic read; a command is a write to the Cmd
//! characteristic, without response when the characteristic allows it.
//!
//! The device found by a scan is cached so the next connect skips
//! discovery. Any drop or failed handshake forgets it again.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    report_completion, DropReason, EventSender, Transport, TransportEvent, TransportKind,
};
use crate::error::LinkError;
use crate::frame::FrameKind;
use crate::queue::{OperationKind, PendingOperation};

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5A59D14B_D6B1_4CDE_B336_4EBC87960C4F);
pub const INFO_UUID: Uuid = Uuid::from_u128(0x68D4DC98_E0EA_48B1_838C_4BD6E7A3067A);
pub const MODES_UUID: Uuid = Uuid::from_u128(0x8F9D3A3A_486D_4B5F_A7A7_1304942B75FB);
pub const SENSOR_UUID: Uuid = Uuid::from_u128(0xADFB2D54_EEC2_4B9B_A77B_BA53ECBF0A87);
pub const CMD_UUID: Uuid = Uuid::from_u128(0x84F4E7DA_4695_4DAA_8485_E4A5CCC91ABB);

/// BLE transport settings.
#[derive(Debug, Clone)]
pub struct BleConfig {
    pub service: Uuid,
    pub info: Uuid,
    pub modes: Uuid,
    pub sensor: Uuid,
    pub cmd: Uuid,
    pub scan_timeout: Duration,
    /// Pause after discovery before the link is reported up.
    pub settle_delay: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on a single GATT read or write.
    pub operation_timeout: Duration,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            info: INFO_UUID,
            modes: MODES_UUID,
            sensor: SENSOR_UUID,
            cmd: CMD_UUID,
            scan_timeout: Duration::from_secs(20),
            settle_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl BleConfig {
    /// Characteristic UUID carrying frames of `kind`.
    pub fn characteristic_uuid(&self, kind: FrameKind) -> Uuid {
        match kind {
            FrameKind::Info => self.info,
            FrameKind::Modes => self.modes,
            FrameKind::Sensor => self.sensor,
            FrameKind::Cmd => self.cmd,
        }
    }
}

/// An established GATT link with its resolved characteristics.
struct GattLink {
    peripheral: Peripheral,
    characteristics: HashMap<FrameKind, Characteristic>,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// btleplug-backed adapter using the first Bluetooth adapter of the host.
pub struct BleTransport {
    config: BleConfig,
    adapter: Arc<OnceCell<Adapter>>,
    target: Arc<Mutex<Option<Peripheral>>>,
    link: Arc<Mutex<Option<GattLink>>>,
    scan_cancel: CancellationToken,
    link_cancel: CancellationToken,
    link_task: Option<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(config: BleConfig) -> Self {
        Self {
            config,
            adapter: Arc::new(OnceCell::new()),
            target: Arc::new(Mutex::new(None)),
            link: Arc::new(Mutex::new(None)),
            scan_cancel: CancellationToken::new(),
            link_cancel: CancellationToken::new(),
            link_task: None,
        }
    }
}

impl Default for BleTransport {
    fn default() -> Self {
        Self::new(BleConfig::default())
    }
}

async fn first_adapter(cell: &OnceCell<Adapter>) -> Result<Adapter, LinkError> {
    cell.get_or_try_init(|| async {
        let manager = Manager::new().await?;
        manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::LinkFailure("no bluetooth adapter".into()))
    })
    .await
    .cloned()
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    fn has_target(&self) -> bool {
        lock(&self.target).is_some()
    }

    fn supports_discovery(&self) -> bool {
        true
    }

    async fn is_available(&self) -> bool {
        match first_adapter(&self.adapter).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "bluetooth unavailable");
                false
            }
        }
    }

    fn start_scan(&mut self, events: EventSender) {
        self.scan_cancel = CancellationToken::new();
        let cancel = self.scan_cancel.clone();
        let cell = Arc::clone(&self.adapter);
        let target = Arc::clone(&self.target);
        let service = self.config.service;
        let window = self.config.scan_timeout;

        tokio::spawn(async move {
            let outcome = match first_adapter(&cell).await {
                Ok(adapter) => run_scan(&adapter, service, window, &cancel, &target).await,
                Err(e) => Err(e),
            };
            let event = match outcome {
                Ok(Some(event)) => event,
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "scan failed");
                    TransportEvent::ScanFailed(e)
                }
            };
            let _ = events.send(event).await;
        });
    }

    fn stop_scan(&mut self) {
        self.scan_cancel.cancel();
    }

    fn start_connect(&mut self, events: EventSender) {
        self.link_cancel = CancellationToken::new();
        let cancel = self.link_cancel.clone();
        let cell = Arc::clone(&self.adapter);
        let target = Arc::clone(&self.target);
        let link = Arc::clone(&self.link);
        let config = self.config.clone();

        self.link_task = Some(tokio::spawn(async move {
            let cached = lock(&target).clone();
            let Some(peripheral) = cached else {
                let _ = events
                    .send(TransportEvent::LinkFailed(LinkError::LinkFailure(
                        "no device discovered".into(),
                    )))
                    .await;
                return;
            };

            // Subscribe before connecting so an early drop is not missed.
            let mut central_events = match first_adapter(&cell).await {
                Ok(adapter) => match adapter.events().await {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = events.send(TransportEvent::LinkFailed(e.into())).await;
                        return;
                    }
                },
                Err(e) => {
                    let _ = events.send(TransportEvent::LinkFailed(e)).await;
                    return;
                }
            };

            let established = tokio::select! {
                _ = cancel.cancelled() => return,
                r = establish(&peripheral, &config) => r,
            };
            let characteristics = match established {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "link establishment failed");
                    if let Err(e) = peripheral.disconnect().await {
                        debug!(error = %e, "disconnect after failed handshake");
                    }
                    lock(&target).take();
                    let _ = events.send(TransportEvent::LinkFailed(e)).await;
                    return;
                }
            };
            *lock(&link) = Some(GattLink {
                peripheral: peripheral.clone(),
                characteristics,
            });

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(config.settle_delay) => {}
            }
            info!(address = %peripheral.address(), "gatt link up");
            if events.send(TransportEvent::LinkUp).await.is_err() {
                return;
            }

            let id = peripheral.id();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = central_events.next() => match event {
                        Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => break,
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            info!(address = %peripheral.address(), "gatt link lost");
            lock(&link).take();
            lock(&target).take();
            let _ = events
                .send(TransportEvent::LinkLost(DropReason::Clean))
                .await;
        }));
    }

    fn execute(&mut self, op: PendingOperation, events: EventSender) {
        let kind = op.frame_kind();
        let resolved = lock(&self.link).as_ref().and_then(|link| {
            link.characteristics
                .get(&kind)
                .map(|c| (link.peripheral.clone(), c.clone()))
        });
        let cancel = self.link_cancel.clone();
        let limit = self.config.operation_timeout;

        tokio::spawn(async move {
            let result = match resolved {
                None => Err(LinkError::NotConnected),
                Some((peripheral, characteristic)) => tokio::select! {
                    _ = cancel.cancelled() => Err(LinkError::Cancelled),
                    r = timeout(limit, gatt_exchange(&peripheral, &characteristic, &op)) => {
                        r.unwrap_or(Err(LinkError::Timeout(limit)))
                    }
                },
            };
            report_completion(&events, &op, result).await;
        });
    }

    async fn disconnect(&mut self) {
        self.scan_cancel.cancel();
        self.link_cancel.cancel();
        if let Some(task) = self.link_task.take() {
            task.abort();
        }
        let link = lock(&self.link).take();
        if let Some(link) = link {
            match timeout(Duration::from_secs(5), link.peripheral.disconnect()).await {
                Ok(Ok(())) => info!("gatt link closed"),
                Ok(Err(e)) => debug!(error = %e, "gatt disconnect failed"),
                Err(_) => debug!("gatt disconnect timed out"),
            }
        }
        lock(&self.target).take();
    }
}

/// Scan until an advertisement carries `service`, the window elapses, or
/// `cancel` fires (`Ok(None)`).
async fn run_scan(
    adapter: &Adapter,
    service: Uuid,
    window: Duration,
    cancel: &CancellationToken,
    target: &Mutex<Option<Peripheral>>,
) -> Result<Option<TransportEvent>, LinkError> {
    let mut central_events = adapter.events().await?;
    adapter
        .start_scan(ScanFilter {
            services: vec![service],
        })
        .await
        .map_err(|e| LinkError::ScanFailure(e.to_string()))?;
    info!(%service, ?window, "scanning");

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(None),
            _ = &mut deadline => {
                info!("scan window elapsed");
                break Ok(Some(TransportEvent::ScanTimedOut(window)));
            }
            event = central_events.next() => {
                let id = match event {
                    Some(CentralEvent::DeviceDiscovered(id))
                    | Some(CentralEvent::DeviceUpdated(id))
                    | Some(CentralEvent::ServicesAdvertisement { id, .. }) => id,
                    Some(_) => continue,
                    None => break Err(LinkError::ScanFailure("adapter event stream ended".into())),
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                if !props.services.contains(&service) {
                    continue;
                }
                let address = peripheral.address().to_string();
                info!(name = ?props.local_name, %address, "device found");
                *lock(target) = Some(peripheral);
                break Ok(Some(TransportEvent::TargetFound {
                    name: props.local_name,
                    address,
                }));
            }
        }
    };

    if let Err(e) = adapter.stop_scan().await {
        debug!(error = %e, "stop_scan failed");
    }
    outcome
}

/// Connect, discover services and resolve every characteristic.
async fn establish(
    peripheral: &Peripheral,
    config: &BleConfig,
) -> Result<HashMap<FrameKind, Characteristic>, LinkError> {
    timeout(config.connect_timeout, peripheral.connect())
        .await
        .map_err(|_| {
            LinkError::LinkFailure(format!("connect timed out after {:?}", config.connect_timeout))
        })??;
    peripheral.discover_services().await?;
    resolve_characteristics(&peripheral.characteristics(), config)
}

/// Map each frame kind to its characteristic in the target service.
fn resolve_characteristics(
    discovered: &BTreeSet<Characteristic>,
    config: &BleConfig,
) -> Result<HashMap<FrameKind, Characteristic>, LinkError> {
    let mut resolved = HashMap::new();
    let mut missing = Vec::new();
    for kind in FrameKind::ALL {
        let uuid = config.characteristic_uuid(kind);
        match discovered
            .iter()
            .find(|c| c.uuid == uuid && c.service_uuid == config.service)
        {
            Some(c) => {
                resolved.insert(kind, c.clone());
            }
            None => missing.push(kind),
        }
    }
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(LinkError::HandshakeIncomplete { missing })
    }
}

fn write_type(characteristic: &Characteristic) -> WriteType {
    if characteristic
        .properties
        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
    {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    }
}

async fn gatt_exchange(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
    op: &PendingOperation,
) -> Result<Option<Bytes>, LinkError> {
    match &op.kind {
        OperationKind::Read(_) => {
            let value = peripheral.read(characteristic).await?;
            Ok(Some(Bytes::from(value)))
        }
        OperationKind::Write(payload) => {
            peripheral
                .write(characteristic, payload, write_type(characteristic))
                .await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn characteristic(uuid: Uuid, service: Uuid, properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid,
            service_uuid: service,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    fn full_set(config: &BleConfig) -> BTreeSet<Characteristic> {
        FrameKind::ALL
            .iter()
            .map(|k| {
                characteristic(
                    config.characteristic_uuid(*k),
                    config.service,
                    CharPropFlags::READ,
                )
            })
            .collect()
    }

    #[test]
    fn default_timings() {
        let config = BleConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(20));
        assert_eq!(config.settle_delay, Duration::from_millis(1000));
        assert_eq!(
            config.service.to_string(),
            "5a59d14b-d6b1-4cde-b336-4ebc87960c4f"
        );
        assert_eq!(config.characteristic_uuid(FrameKind::Cmd), CMD_UUID);
    }

    #[test]
    fn resolves_all_four_characteristics() {
        let config = BleConfig::default();
        let resolved = resolve_characteristics(&full_set(&config), &config).unwrap();
        assert_eq!(resolved.len(), 4);
        assert_eq!(resolved[&FrameKind::Sensor].uuid, SENSOR_UUID);
    }

    #[test]
    fn missing_characteristic_is_handshake_incomplete() {
        let config = BleConfig::default();
        let mut set = full_set(&config);
        set.retain(|c| c.uuid != CMD_UUID);
        match resolve_characteristics(&set, &config) {
            Err(LinkError::HandshakeIncomplete { missing }) => {
                assert_eq!(missing, vec![FrameKind::Cmd]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn characteristic_in_other_service_is_ignored() {
        let config = BleConfig::default();
        let mut set = full_set(&config);
        set.retain(|c| c.uuid != INFO_UUID);
        set.insert(characteristic(INFO_UUID, Uuid::nil(), CharPropFlags::READ));
        assert!(resolve_characteristics(&set, &config).is_err());
    }

    #[test]
    fn write_type_follows_characteristic_properties() {
        let unacked = characteristic(
            CMD_UUID,
            SERVICE_UUID,
            CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE,
        );
        assert_eq!(write_type(&unacked), WriteType::WithoutResponse);

        let acked = characteristic(CMD_UUID, SERVICE_UUID, CharPropFlags::WRITE);
        assert_eq!(write_type(&acked), WriteType::WithResponse);
    }

    #[tokio::test]
    async fn execute_without_link_is_not_connected() {
        let mut transport = BleTransport::default();
        assert!(!transport.has_target());

        let (tx, mut rx) = tokio::sync::mpsc::channel(2);
        transport.execute(PendingOperation::read(4, FrameKind::Info), tx);
        match rx.recv().await.unwrap() {
            TransportEvent::Completed { id, result, .. } => {
                assert_eq!(id, 4);
                assert!(matches!(result, Err(LinkError::NotConnected)));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
