//! # rc-remote — handheld telemetry client
//!
//! Wires the `rc-core` session to its collaborators: a motion-sample
//! source ticking at the device rate, a line-oriented operator console
//! standing in for the button/slider surface, and a TOML config.

pub mod config;
pub mod console;
pub mod motion;
