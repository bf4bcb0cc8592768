//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rc_core::{ChannelSet, PrecisionMode, SessionOptions};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the handheld client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Controller endpoint.
    pub network: NetworkConfig,
    /// Sampling and encoding.
    pub telemetry: TelemetryConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Controller endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Controller host. Empty means "ask the operator".
    pub address: String,
    /// Controller port, kept as text like the operator enters it.
    pub port: String,
    /// WebSocket open timeout in milliseconds.
    pub open_timeout_ms: u64,
    /// Connect immediately at start-up.
    pub connect_on_start: bool,
}

/// Sampling and encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// 6 decimals instead of 3.
    pub high_precision: bool,
    /// Motion sample rate in Hz.
    pub sample_rate_hz: f64,
    /// Start sampling at start-up.
    pub sampling: bool,
    pub orientation: bool,
    pub pitch: bool,
    pub roll: bool,
    /// Initial gripper set-point, `0..=999`.
    pub gripper: f64,
    /// Initial arm height, `-1..=1`.
    pub height: f64,
    /// JSON-lines file of samples to replay instead of the simulator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replay: Option<PathBuf>,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level / filter directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: "1145".into(),
            open_timeout_ms: 5000,
            connect_on_start: false,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            high_precision: false,
            sample_rate_hz: 60.0,
            sampling: false,
            orientation: true,
            pitch: true,
            roll: true,
            gripper: 0.0,
            height: 0.0,
            replay: None,
        }
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

impl RemoteConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Session start-up options derived from this config.
    pub fn session_options(&self) -> SessionOptions {
        let t = &self.telemetry;
        let mut channels = ChannelSet::empty();
        channels.set(ChannelSet::ORIENTATION, t.orientation);
        channels.set(ChannelSet::PITCH, t.pitch);
        channels.set(ChannelSet::ROLL, t.roll);
        SessionOptions {
            open_timeout: Duration::from_millis(self.network.open_timeout_ms),
            precision: PrecisionMode::from_high(t.high_precision),
            channels,
            gripper: t.gripper,
            height: t.height,
            sampling: t.sampling,
        }
    }

    /// Interval between motion samples. Non-positive rates fall back
    /// to 60 Hz.
    pub fn sample_period(&self) -> Duration {
        let hz = self.telemetry.sample_rate_hz;
        if hz.is_finite() && hz > 0.0 {
            Duration::from_secs_f64(1.0 / hz)
        } else {
            Duration::from_secs_f64(1.0 / 60.0)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
