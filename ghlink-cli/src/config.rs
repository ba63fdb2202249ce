//! Configuration for the ghlink client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use ghlink_core::transport::socket::DEFAULT_PORT;
use ghlink_core::{
    BleConfig, BleTransport, LoopbackConfig, LoopbackTransport, SocketConfig, SocketTransport,
    Transport, TransportKind,
};

/// Accepted polling interval range in milliseconds.
pub const POLL_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 100..=60_000;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Transport selection.
    pub transport: TransportSection,
    /// TCP socket transport settings.
    pub socket: SocketSection,
    /// Bluetooth-LE transport settings.
    pub ble: BleSection,
    /// Simulated host settings.
    pub loopback: LoopbackSection,
    /// Periodic telemetry polling.
    pub polling: PollingConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Which transport the session runs on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// "ble", "socket" or "loopback".
    pub kind: TransportKind,
}

/// TCP socket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSection {
    /// Remote host IP or name.
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Bound on each request/response exchange.
    pub read_timeout_ms: u64,
}

/// Bluetooth-LE settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSection {
    pub scan_timeout_ms: u64,
    /// Pause after discovery before the link is usable.
    pub settle_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Simulated host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackSection {
    pub device_model: String,
    /// When false, scans never find the simulated host.
    pub discoverable: bool,
}

/// Polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between Sensor/Modes read cycles.
    pub interval_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SocketSection {
    fn default() -> Self {
        let socket = SocketConfig::default();
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            connect_timeout_ms: socket.connect_timeout.as_millis() as u64,
            read_timeout_ms: socket.read_timeout.as_millis() as u64,
        }
    }
}

impl Default for BleSection {
    fn default() -> Self {
        let ble = BleConfig::default();
        Self {
            scan_timeout_ms: ble.scan_timeout.as_millis() as u64,
            settle_delay_ms: ble.settle_delay.as_millis() as u64,
            connect_timeout_ms: ble.connect_timeout.as_millis() as u64,
        }
    }
}

impl Default for LoopbackSection {
    fn default() -> Self {
        Self {
            device_model: LoopbackConfig::default().device_model,
            discoverable: true,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Return every problem that would stop a session from working.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.transport.kind == TransportKind::Socket {
            if self.socket.host.trim().is_empty() {
                problems.push("socket.host is empty".to_string());
            }
            if self.socket.port == 0 {
                problems.push("socket.port must be non-zero".to_string());
            }
        }
        if !POLL_INTERVAL_RANGE_MS.contains(&self.polling.interval_ms) {
            problems.push(format!(
                "polling.interval_ms {} outside {}..={}",
                self.polling.interval_ms,
                POLL_INTERVAL_RANGE_MS.start(),
                POLL_INTERVAL_RANGE_MS.end()
            ));
        }
        problems
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.polling.interval_ms)
    }

    pub fn to_socket_config(&self) -> SocketConfig {
        SocketConfig {
            host: self.socket.host.trim().to_string(),
            port: self.socket.port,
            connect_timeout: Duration::from_millis(self.socket.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.socket.read_timeout_ms),
            ..SocketConfig::default()
        }
    }

    pub fn to_ble_config(&self) -> BleConfig {
        BleConfig {
            scan_timeout: Duration::from_millis(self.ble.scan_timeout_ms),
            settle_delay: Duration::from_millis(self.ble.settle_delay_ms),
            connect_timeout: Duration::from_millis(self.ble.connect_timeout_ms),
            ..BleConfig::default()
        }
    }

    pub fn to_loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            device_model: self.loopback.device_model.clone(),
            discoverable: self.loopback.discoverable,
            ..LoopbackConfig::default()
        }
    }

    /// Build the configured transport.
    pub fn build_transport(&self) -> Box<dyn Transport> {
        match self.transport.kind {
            TransportKind::Ble => Box::new(BleTransport::new(self.to_ble_config())),
            TransportKind::Socket => Box::new(SocketTransport::new(self.to_socket_config())),
            TransportKind::Loopback => Box::new(LoopbackTransport::new(self.to_loopback_config())),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("interval_ms"));
        assert!(text.contains("kind = \"socket\""));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = ClientConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.socket.port, 8080);
        assert_eq!(parsed.socket.read_timeout_ms, 4000);
        assert_eq!(parsed.ble.settle_delay_ms, 1000);
        assert_eq!(parsed.polling.interval_ms, 2000);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [transport]
            kind = "ble"

            [ble]
            scan_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.transport.kind, TransportKind::Ble);
        assert_eq!(parsed.to_ble_config().scan_timeout, Duration::from_secs(5));
        assert_eq!(parsed.to_ble_config().settle_delay, Duration::from_millis(1000));
        assert_eq!(parsed.socket.port, 8080);
    }

    #[test]
    fn validate_flags_empty_host_and_bad_interval() {
        let mut cfg = ClientConfig::default();
        cfg.polling.interval_ms = 10;
        let problems = cfg.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("host"));
        assert!(problems[1].contains("interval_ms"));

        cfg.socket.host = "192.168.1.20".into();
        cfg.polling.interval_ms = 2000;
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn host_not_required_for_other_transports() {
        let mut cfg = ClientConfig::default();
        cfg.transport.kind = TransportKind::Loopback;
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.build_transport().kind(), TransportKind::Loopback);
    }

    #[test]
    fn socket_config_trims_host() {
        let mut cfg = ClientConfig::default();
        cfg.socket.host = " 10.0.0.5 ".into();
        cfg.socket.port = 9000;
        let socket = cfg.to_socket_config();
        assert_eq!(socket.address(), "10.0.0.5:9000");
        assert_eq!(socket.response_buffer, 1024);
    }
}
