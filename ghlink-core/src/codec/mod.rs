//! Binary codec for the four frame kinds.
//!
//! Pure functions, no I/O and no state. Multi-byte fields are
//! little-endian.
//!
//! ## Wire format
//!
//! **Info** (response):
//! ```text
//! name_len:   u8        (1)
//! name:       [u8]      (name_len, ASCII)
//! ```
//!
//! **Modes** (response):
//! ```text
//! performance_mode: u8  (1)
//! gpu_mode:         u8  (1)
//! ```
//!
//! **Sensor** (response, 18 bytes):
//! ```text
//! cpu_fan, gpu_fan, mid_fan:              u8 × 3
//! cpu_fan_max, gpu_fan_max, mid_fan_max:  u8 × 3
//! cpu_temp_c, gpu_temp_c:                 u8 × 2
//! cpu_usage, gpu_usage:                   u8 × 2
//! total_memory_kb:                        i32 (4)
//! free_memory_kb:                         i32 (4)
//! ```
//!
//! **Cmd** (request, 3 bytes):
//! ```text
//! marker (= FrameKind::Cmd), sub_command, value
//! ```
//!
//! Responses may carry trailing bytes (the socket reads into a fixed
//! buffer); only the prefix each layout needs is decoded. A frame shorter
//! than that prefix is an error.

use crate::error::LinkError;
use crate::frame::{
    COMMAND_LEN, Command, FrameKind, GpuMode, PerformanceMode, SUB_SET_GPU_MODE,
    SUB_SET_PERFORMANCE_MODE,
};
use crate::model::{FanReading, MemoryReading, ModeState, SensorReadings};

/// Minimum length of an Info frame (the length byte alone).
pub const INFO_MIN_LEN: usize = 1;
/// Length of a Modes frame.
pub const MODES_LEN: usize = 2;
/// Length of a Sensor frame.
pub const SENSOR_LEN: usize = 18;

// ── Frame ────────────────────────────────────────────────────────

/// A decoded response frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Info(String),
    Modes(ModeState),
    Sensor(SensorReadings),
}

impl Frame {
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Info(_) => FrameKind::Info,
            Frame::Modes(_) => FrameKind::Modes,
            Frame::Sensor(_) => FrameKind::Sensor,
        }
    }
}

/// Decode a response according to the kind it was requested as.
pub fn decode_frame(kind: FrameKind, data: &[u8]) -> Result<Frame, LinkError> {
    match kind {
        FrameKind::Info => decode_info(data).map(Frame::Info),
        FrameKind::Modes => decode_modes(data).map(Frame::Modes),
        FrameKind::Sensor => decode_sensors(data).map(Frame::Sensor),
        FrameKind::Cmd => Err(LinkError::NotReadable(FrameKind::Cmd)),
    }
}

fn ensure_len(kind: FrameKind, data: &[u8], expected: usize) -> Result<(), LinkError> {
    if data.len() < expected {
        return Err(LinkError::FrameTooShort {
            kind,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

// ── Decoding ─────────────────────────────────────────────────────

/// Decode an Info frame into the device model name.
pub fn decode_info(data: &[u8]) -> Result<String, LinkError> {
    ensure_len(FrameKind::Info, data, INFO_MIN_LEN)?;
    let len = data[0] as usize;
    ensure_len(FrameKind::Info, data, INFO_MIN_LEN + len)?;

    let name = &data[1..1 + len];
    if !name.is_ascii() {
        return Err(LinkError::InvalidModelName);
    }
    // ASCII is valid UTF-8.
    Ok(name.iter().map(|&b| b as char).collect())
}

/// Decode a Modes frame.
pub fn decode_modes(data: &[u8]) -> Result<ModeState, LinkError> {
    ensure_len(FrameKind::Modes, data, MODES_LEN)?;
    Ok(ModeState {
        performance: PerformanceMode::try_from(data[0])?,
        gpu: GpuMode::try_from(data[1])?,
    })
}

/// Decode a Sensor frame.
pub fn decode_sensors(data: &[u8]) -> Result<SensorReadings, LinkError> {
    ensure_len(FrameKind::Sensor, data, SENSOR_LEN)?;
    let total_kb = i32::from_le_bytes([data[10], data[11], data[12], data[13]]);
    let free_kb = i32::from_le_bytes([data[14], data[15], data[16], data[17]]);

    Ok(SensorReadings {
        cpu_fan: FanReading::new(data[0], data[3]),
        gpu_fan: FanReading::new(data[1], data[4]),
        mid_fan: FanReading::new(data[2], data[5]),
        cpu_temp_c: data[6],
        gpu_temp_c: data[7],
        cpu_usage_percent: data[8],
        gpu_usage_percent: data[9],
        memory: MemoryReading::new(total_kb, free_kb),
    })
}

/// Decode a 3-byte command frame (the remote host's side of a write).
pub fn decode_command(data: &[u8]) -> Result<Command, LinkError> {
    ensure_len(FrameKind::Cmd, data, COMMAND_LEN)?;
    if data[0] != FrameKind::Cmd.code() {
        return Err(LinkError::UnknownVariant {
            type_name: "CommandMarker",
            value: data[0] as u64,
        });
    }
    match data[1] {
        SUB_SET_PERFORMANCE_MODE => Ok(Command::SetPerformanceMode(data[2].try_into()?)),
        SUB_SET_GPU_MODE => Ok(Command::SetGpuMode(data[2].try_into()?)),
        other => Err(LinkError::UnknownVariant {
            type_name: "SubCommand",
            value: other as u64,
        }),
    }
}

// ── Encoding ─────────────────────────────────────────────────────

/// Encode a command as `[Cmd, sub_command, value]`.
pub fn encode_command(command: &Command) -> [u8; COMMAND_LEN] {
    [FrameKind::Cmd.code(), command.sub_command(), command.value()]
}

/// Encode the single-byte read request used by the socket transport.
pub fn encode_read_request(kind: FrameKind) -> Result<[u8; 1], LinkError> {
    if !kind.is_readable() {
        return Err(LinkError::NotReadable(kind));
    }
    Ok([kind.code()])
}

/// Encode an Info response. Names longer than 255 bytes are truncated.
pub fn encode_info(device_model: &str) -> Vec<u8> {
    let name = &device_model.as_bytes()[..device_model.len().min(u8::MAX as usize)];
    let mut frame = Vec::with_capacity(1 + name.len());
    frame.push(name.len() as u8);
    frame.extend_from_slice(name);
    frame
}

/// Encode a Modes response.
pub fn encode_modes(modes: &ModeState) -> [u8; MODES_LEN] {
    [modes.performance as u8, modes.gpu as u8]
}

/// Encode a Sensor response.
pub fn encode_sensors(s: &SensorReadings) -> [u8; SENSOR_LEN] {
    let mut buf = [0u8; SENSOR_LEN];
    buf[0] = s.cpu_fan.current;
    buf[1] = s.gpu_fan.current;
    buf[2] = s.mid_fan.current;
    buf[3] = s.cpu_fan.max;
    buf[4] = s.gpu_fan.max;
    buf[5] = s.mid_fan.max;
    buf[6] = s.cpu_temp_c;
    buf[7] = s.gpu_temp_c;
    buf[8] = s.cpu_usage_percent;
    buf[9] = s.gpu_usage_percent;
    buf[10..14].copy_from_slice(&s.memory.total_kb.to_le_bytes());
    buf[14..18].copy_from_slice(&s.memory.free_kb.to_le_bytes());
    buf
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const GOLDEN_SENSOR: [u8; 18] = [
        10, 20, 5, 100, 100, 100, 45, 60, 30, 55, 0x00, 0x08, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00,
    ];

    #[test]
    fn sensor_golden_bytes() {
        let s = decode_sensors(&GOLDEN_SENSOR).unwrap();
        assert_eq!(s.cpu_fan, FanReading::new(10, 100));
        assert_eq!(s.gpu_fan, FanReading::new(20, 100));
        assert_eq!(s.mid_fan, FanReading::new(5, 100));
        assert_eq!(s.cpu_temp_c, 45);
        assert_eq!(s.gpu_temp_c, 60);
        assert_eq!(s.cpu_usage_percent, 30);
        assert_eq!(s.gpu_usage_percent, 55);
        assert_eq!(s.memory.total_kb, 2048);
        assert_eq!(s.memory.free_kb, 1024);
        assert_eq!(s.memory.used_kb(), 1024);

        assert_eq!(encode_sensors(&s), GOLDEN_SENSOR);
    }

    #[test]
    fn sensor_negative_memory_is_signed() {
        let mut bytes = GOLDEN_SENSOR;
        bytes[10..14].copy_from_slice(&(-1i32).to_le_bytes());
        let s = decode_sensors(&bytes).unwrap();
        assert_eq!(s.memory.total_kb, -1);
        assert_eq!(s.memory.percent(), 0.0);
    }

    #[test]
    fn sensor_trailing_bytes_ignored() {
        let mut buf = vec![0u8; 1024];
        buf[..18].copy_from_slice(&GOLDEN_SENSOR);
        assert_eq!(
            decode_sensors(&buf).unwrap(),
            decode_sensors(&GOLDEN_SENSOR).unwrap()
        );
    }

    #[test]
    fn sensor_too_short() {
        assert!(matches!(
            decode_sensors(&GOLDEN_SENSOR[..17]),
            Err(LinkError::FrameTooShort {
                kind: FrameKind::Sensor,
                expected: 18,
                actual: 17
            })
        ));
        assert!(decode_sensors(&[]).is_err());
    }

    #[test]
    fn info_decodes_model_name() {
        let bytes = [4, b'T', b'e', b's', b't'];
        assert_eq!(decode_info(&bytes).unwrap(), "Test");
        assert_eq!(decode_info(&bytes).unwrap(), decode_info(&bytes).unwrap());
        assert_eq!(decode_info(&[0]).unwrap(), "");
    }

    #[test]
    fn info_declared_length_exceeds_payload() {
        assert!(matches!(
            decode_info(&[9, b'a', b'b']),
            Err(LinkError::FrameTooShort {
                kind: FrameKind::Info,
                expected: 10,
                actual: 3
            })
        ));
        assert!(decode_info(&[]).is_err());
    }

    #[test]
    fn info_rejects_non_ascii() {
        assert!(matches!(
            decode_info(&[2, 0xC3, 0xA9]),
            Err(LinkError::InvalidModelName)
        ));
    }

    #[test]
    fn info_encode_matches_layout() {
        assert_eq!(encode_info("Test"), vec![4, b'T', b'e', b's', b't']);
        let long = "x".repeat(300);
        assert_eq!(encode_info(&long).len(), 256);
    }

    #[test]
    fn modes_decode() {
        let bytes = [1, 3];
        let m = decode_modes(&bytes).unwrap();
        assert_eq!(m.performance, PerformanceMode::Turbo);
        assert_eq!(m.gpu, GpuMode::Optimized);
        assert_eq!(decode_modes(&bytes).unwrap(), m);
    }

    #[test]
    fn modes_errors() {
        assert!(matches!(
            decode_modes(&[1]),
            Err(LinkError::FrameTooShort { .. })
        ));
        assert!(matches!(
            decode_modes(&[7, 0]),
            Err(LinkError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn command_bytes_exact() {
        let cmd = Command::SetPerformanceMode(PerformanceMode::Silent);
        assert_eq!(encode_command(&cmd), [3, 1, 2]);
        assert_eq!(encode_command(&Command::SetGpuMode(GpuMode::Eco)), [3, 2, 0]);
        assert_eq!(decode_command(&[3, 1, 2]).unwrap(), cmd);
    }

    #[test]
    fn command_decode_rejects_garbage() {
        assert!(decode_command(&[2, 1, 0]).is_err());
        assert!(decode_command(&[3, 9, 0]).is_err());
        assert!(decode_command(&[3, 1]).is_err());
    }

    #[test]
    fn read_request_only_for_readable_kinds() {
        assert_eq!(encode_read_request(FrameKind::Sensor).unwrap(), [2]);
        assert!(matches!(
            encode_read_request(FrameKind::Cmd),
            Err(LinkError::NotReadable(FrameKind::Cmd))
        ));
    }

    #[test]
    fn decode_frame_dispatches_on_kind() {
        let frame = decode_frame(FrameKind::Modes, &[0, 1]).unwrap();
        assert_eq!(frame.kind(), FrameKind::Modes);
        assert!(decode_frame(FrameKind::Cmd, &[3, 1, 1]).is_err());
    }
}
