//! Human-readable and JSON output.

use serde::Serialize;

use ghlink_core::{DeviceSnapshot, FanReading, ModeState};

/// Serialize any report as a single JSON line.
pub fn json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

fn fan(label: &str, reading: &FanReading) -> String {
    format!(
        "{label} fan {:>5} rpm ({:>3.0}%)",
        reading.rpm(),
        reading.percent() * 100.0
    )
}

pub fn modes(modes: &ModeState) -> String {
    format!("performance {}, gpu {}", modes.performance, modes.gpu)
}

/// Multi-line telemetry report.
pub fn snapshot(snapshot: &DeviceSnapshot) -> String {
    let s = &snapshot.sensors;
    let mut lines = Vec::with_capacity(6);
    if !snapshot.device_model.is_empty() {
        lines.push(snapshot.device_model.clone());
    }
    lines.push(format!(
        "CPU {:>3}°C {:>3}%  {}",
        s.cpu_temp_c,
        s.cpu_usage_percent,
        fan("cpu", &s.cpu_fan)
    ));
    lines.push(format!(
        "GPU {:>3}°C {:>3}%  {}",
        s.gpu_temp_c,
        s.gpu_usage_percent,
        fan("gpu", &s.gpu_fan)
    ));
    lines.push(format!("             {}", fan("mid", &s.mid_fan)));
    lines.push(format!(
        "MEM {} / {} MB ({:.0}%)",
        s.memory.used_kb() / 1024,
        s.memory.total_kb / 1024,
        s.memory.percent() * 100.0
    ));
    lines.push(modes(&snapshot.modes));
    lines.join("\n")
}
