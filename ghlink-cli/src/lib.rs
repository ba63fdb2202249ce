//! # ghlink-cli — command-line client
//!
//! Connects to a remote hardware-monitor host over the configured
//! transport and either streams telemetry or applies a mode change.
//!
//! ## Commands
//!
//! - **monitor** (default): poll Sensor and Modes frames at the configured
//!   interval and print each update.
//! - **info**: print the device model.
//! - **set-performance / set-gpu**: write a mode change, then read the
//!   modes back and print what the host confirmed.

pub mod config;
pub mod poller;
pub mod render;
