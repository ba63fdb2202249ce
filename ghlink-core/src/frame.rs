//! Frame kinds, device modes and command definitions.
//!
//! Unknown wire bytes decode to `LinkError::UnknownVariant` through `TryFrom`.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::LinkError;

// ── FrameKind ────────────────────────────────────────────────────

/// Identifies both the wire op-code of a request and the decode routine
/// applied to its response.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum FrameKind {
    /// Device model name.
    Info = 0,
    /// Performance and GPU mode state.
    Modes = 1,
    /// Fan, temperature, usage and memory telemetry.
    Sensor = 2,
    /// Mode-change command (write only).
    Cmd = 3,
}

impl FrameKind {
    /// All kinds, in op-code order.
    pub const ALL: [FrameKind; 4] = [Self::Info, Self::Modes, Self::Sensor, Self::Cmd];

    /// The single-byte op-code used on the wire.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns `true` for kinds that can be requested with a read.
    pub fn is_readable(self) -> bool {
        !matches!(self, Self::Cmd)
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameKind::Info),
            1 => Ok(FrameKind::Modes),
            2 => Ok(FrameKind::Sensor),
            3 => Ok(FrameKind::Cmd),
            _ => Err(LinkError::UnknownVariant {
                type_name: "FrameKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::Info => write!(f, "Info"),
            FrameKind::Modes => write!(f, "Modes"),
            FrameKind::Sensor => write!(f, "Sensor"),
            FrameKind::Cmd => write!(f, "Cmd"),
        }
    }
}

// ── PerformanceMode ──────────────────────────────────────────────

/// Performance profile of the remote host.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PerformanceMode {
    #[default]
    Balanced = 0,
    Turbo = 1,
    Silent = 2,
}

impl TryFrom<u8> for PerformanceMode {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PerformanceMode::Balanced),
            1 => Ok(PerformanceMode::Turbo),
            2 => Ok(PerformanceMode::Silent),
            _ => Err(LinkError::UnknownVariant {
                type_name: "PerformanceMode",
                value: value as u64,
            }),
        }
    }
}

impl FromStr for PerformanceMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "balanced" => Ok(PerformanceMode::Balanced),
            "turbo" => Ok(PerformanceMode::Turbo),
            "silent" => Ok(PerformanceMode::Silent),
            other => Err(LinkError::Other(format!("unknown performance mode: {other}"))),
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceMode::Balanced => write!(f, "Balanced"),
            PerformanceMode::Turbo => write!(f, "Turbo"),
            PerformanceMode::Silent => write!(f, "Silent"),
        }
    }
}

// ── GpuMode ──────────────────────────────────────────────────────

/// GPU switching mode of the remote host.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum GpuMode {
    Eco = 0,
    #[default]
    Standard = 1,
    Ultimate = 2,
    Optimized = 3,
}

impl TryFrom<u8> for GpuMode {
    type Error = LinkError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GpuMode::Eco),
            1 => Ok(GpuMode::Standard),
            2 => Ok(GpuMode::Ultimate),
            3 => Ok(GpuMode::Optimized),
            _ => Err(LinkError::UnknownVariant {
                type_name: "GpuMode",
                value: value as u64,
            }),
        }
    }
}

impl FromStr for GpuMode {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eco" => Ok(GpuMode::Eco),
            "standard" => Ok(GpuMode::Standard),
            "ultimate" => Ok(GpuMode::Ultimate),
            "optimized" => Ok(GpuMode::Optimized),
            other => Err(LinkError::Other(format!("unknown gpu mode: {other}"))),
        }
    }
}

impl fmt::Display for GpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuMode::Eco => write!(f, "Eco"),
            GpuMode::Standard => write!(f, "Standard"),
            GpuMode::Ultimate => write!(f, "Ultimate"),
            GpuMode::Optimized => write!(f, "Optimized"),
        }
    }
}

// ── Command ──────────────────────────────────────────────────────

/// Sub-command byte for a performance-mode change.
pub const SUB_SET_PERFORMANCE_MODE: u8 = 1;
/// Sub-command byte for a GPU-mode change.
pub const SUB_SET_GPU_MODE: u8 = 2;

/// Encoded length of a command frame.
pub const COMMAND_LEN: usize = 3;

/// Mode-change commands understood by the remote host.
///
/// Encoded as `[FrameKind::Cmd, sub_command, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    SetPerformanceMode(PerformanceMode),
    SetGpuMode(GpuMode),
}

impl Command {
    /// The sub-command byte.
    pub fn sub_command(&self) -> u8 {
        match self {
            Command::SetPerformanceMode(_) => SUB_SET_PERFORMANCE_MODE,
            Command::SetGpuMode(_) => SUB_SET_GPU_MODE,
        }
    }

    /// The mode value byte.
    pub fn value(&self) -> u8 {
        match self {
            Command::SetPerformanceMode(mode) => *mode as u8,
            Command::SetGpuMode(mode) => *mode as u8,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetPerformanceMode(mode) => write!(f, "SetPerformanceMode({mode})"),
            Command::SetGpuMode(mode) => write!(f, "SetGpuMode({mode})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_kind_codes() {
        for kind in FrameKind::ALL {
            assert_eq!(FrameKind::try_from(kind.code()).unwrap(), kind);
        }
        assert!(FrameKind::try_from(4).is_err());
        assert!(!FrameKind::Cmd.is_readable());
        assert!(FrameKind::Sensor.is_readable());
    }

    #[test]
    fn modes_reject_unknown_bytes() {
        assert!(matches!(
            PerformanceMode::try_from(3),
            Err(LinkError::UnknownVariant {
                type_name: "PerformanceMode",
                value: 3
            })
        ));
        assert!(GpuMode::try_from(9).is_err());
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("Turbo".parse::<PerformanceMode>().unwrap(), PerformanceMode::Turbo);
        assert_eq!("optimized".parse::<GpuMode>().unwrap(), GpuMode::Optimized);
        assert!("warp".parse::<GpuMode>().is_err());
    }

    #[test]
    fn command_parts() {
        let cmd = Command::SetGpuMode(GpuMode::Ultimate);
        assert_eq!(cmd.sub_command(), SUB_SET_GPU_MODE);
        assert_eq!(cmd.value(), 2);
        assert_eq!(cmd.to_string(), "SetGpuMode(Ultimate)");
    }
}
