//! # ghlink-core
//!
//! Device session layer for the ghlink hardware-monitor client.
//!
//! This crate contains:
//! - **Frames**: `FrameKind`, `PerformanceMode`, `GpuMode`, `Command`
//! - **Model**: `FanReading`, `MemoryReading`, `SensorReadings`, `DeviceSnapshot`
//! - **Codec**: pure encode/decode of Info, Modes, Sensor and Cmd frames
//! - **Queue**: `CommandQueue`, a FIFO with a single in-flight slot
//! - **State**: `ConnectionState` with validated transitions
//! - **Transport**: the `Transport` capability trait with BLE-GATT
//!   (btleplug), TCP socket and in-process loopback adapters
//! - **Session**: the orchestrating task plus its `SessionHandle`
//! - **Error**: `LinkError`, a `thiserror`-based error enum

pub mod codec;
pub mod error;
pub mod frame;
pub mod model;
pub mod queue;
pub mod session;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::Frame;
pub use error::LinkError;
pub use frame::{Command, FrameKind, GpuMode, PerformanceMode};
pub use model::{DeviceSnapshot, FanReading, MemoryReading, ModeState, SensorReadings};
pub use queue::{CommandQueue, OperationKind, PendingOperation};
pub use session::{
    ChannelObserver, Session, SessionConfig, SessionEvent, SessionHandle, SessionObserver,
};
pub use state::ConnectionState;
pub use transport::{
    BleConfig, BleTransport, DropReason, LoopbackConfig, LoopbackProbe, LoopbackTransport,
    SocketConfig, SocketTransport, Transport, TransportEvent, TransportKind,
};
