//! Typed records decoded from remote frames.

use serde::Serialize;

use crate::frame::{GpuMode, PerformanceMode};

// ── Fans ─────────────────────────────────────────────────────────

/// A fan level as reported by the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FanReading {
    /// Current level (hundreds of RPM).
    pub current: u8,
    /// Maximum level (hundreds of RPM).
    pub max: u8,
}

impl FanReading {
    pub fn new(current: u8, max: u8) -> Self {
        Self { current, max }
    }

    /// Fan speed in RPM.
    pub fn rpm(&self) -> u32 {
        self.current as u32 * 100
    }

    /// Current level relative to max, `0.0..=1.0` for sane readings.
    ///
    /// A max below 1 is treated as 1.
    pub fn percent(&self) -> f32 {
        self.current as f32 / (self.max as f32).max(1.0)
    }
}

// ── Memory ───────────────────────────────────────────────────────

/// Memory totals in KB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryReading {
    pub total_kb: i32,
    pub free_kb: i32,
}

impl MemoryReading {
    pub fn new(total_kb: i32, free_kb: i32) -> Self {
        Self { total_kb, free_kb }
    }

    pub fn used_kb(&self) -> i32 {
        self.total_kb.wrapping_sub(self.free_kb)
    }

    /// Used memory relative to total; 0 when total is not positive.
    pub fn percent(&self) -> f32 {
        if self.total_kb <= 0 {
            0.0
        } else {
            self.used_kb() as f32 / self.total_kb as f32
        }
    }
}

// ── Sensors ──────────────────────────────────────────────────────

/// One decoded Sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SensorReadings {
    pub cpu_fan: FanReading,
    pub gpu_fan: FanReading,
    pub mid_fan: FanReading,
    pub cpu_temp_c: u8,
    pub gpu_temp_c: u8,
    pub cpu_usage_percent: u8,
    pub gpu_usage_percent: u8,
    pub memory: MemoryReading,
}

// ── Modes ────────────────────────────────────────────────────────

/// One decoded Modes frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ModeState {
    pub performance: PerformanceMode,
    pub gpu: GpuMode,
}

// ── Snapshot ─────────────────────────────────────────────────────

/// Aggregate of the most recently decoded frames.
///
/// The session never mutates a published snapshot; each decode produces
/// a new one via the `with_*` builders.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DeviceSnapshot {
    pub device_model: String,
    pub modes: ModeState,
    pub sensors: SensorReadings,
}

impl DeviceSnapshot {
    pub fn with_device_model(&self, device_model: String) -> Self {
        Self {
            device_model,
            ..self.clone()
        }
    }

    pub fn with_modes(&self, modes: ModeState) -> Self {
        Self {
            modes,
            ..self.clone()
        }
    }

    pub fn with_sensors(&self, sensors: SensorReadings) -> Self {
        Self {
            sensors,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_derived_values() {
        let fan = FanReading::new(30, 60);
        assert_eq!(fan.rpm(), 3000);
        assert!((fan.percent() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn fan_zero_max_does_not_divide_by_zero() {
        let fan = FanReading::new(5, 0);
        assert_eq!(fan.percent(), 5.0);
    }

    #[test]
    fn memory_derived_values() {
        let mem = MemoryReading::new(2048, 1024);
        assert_eq!(mem.used_kb(), 1024);
        assert!((mem.percent() - 0.5).abs() < f32::EPSILON);

        assert_eq!(MemoryReading::new(0, 0).percent(), 0.0);
        assert_eq!(MemoryReading::new(-5, 0).percent(), 0.0);
    }

    #[test]
    fn snapshot_builders_replace_one_section() {
        let base = DeviceSnapshot::default().with_device_model("G14".into());
        let next = base.with_modes(ModeState {
            performance: PerformanceMode::Turbo,
            gpu: GpuMode::Eco,
        });
        assert_eq!(next.device_model, "G14");
        assert_eq!(next.modes.performance, PerformanceMode::Turbo);
        assert_eq!(base.modes, ModeState::default());
    }
}
