//! Incremental sensor-delta aggregation.
//!
//! The aggregator keeps a running integral of frame-to-frame motion
//! deltas per channel, plus the two operator-set actuator values.
//!
//! ```text
//!  sample ──► accumulate(prev, sample)  ──► advance_baseline(sample)
//!                 │ gated per channel            │ always
//!                 ▼                              ▼
//!            OrientationDelta               last_sample
//! ```
//!
//! Accumulation and baseline advance are separate steps: a disabled
//! channel is frozen but its baseline keeps moving, so re-enabling it
//! never replays motion that happened while it was off.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ── MotionSample ─────────────────────────────────────────────────

/// One decoded orientation sample from the device motion source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub quat_x: f64,
    pub quat_y: f64,
    pub quat_z: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl MotionSample {
    pub fn new(quat_x: f64, quat_y: f64, quat_z: f64, pitch: f64, roll: f64) -> Self {
        Self {
            quat_x,
            quat_y,
            quat_z,
            pitch,
            roll,
        }
    }
}

// ── Channels ─────────────────────────────────────────────────────

bitflags! {
    /// Set of telemetry channels currently accumulating.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelSet: u8 {
        const ORIENTATION = 0b001;
        const PITCH       = 0b010;
        const ROLL        = 0b100;
    }
}

impl Default for ChannelSet {
    fn default() -> Self {
        ChannelSet::all()
    }
}

/// A single independently gated telemetry channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Quaternion x/y/z, gated together.
    Orientation,
    Pitch,
    Roll,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Orientation, Channel::Pitch, Channel::Roll];

    /// The flag bit for this channel.
    pub fn flag(self) -> ChannelSet {
        match self {
            Channel::Orientation => ChannelSet::ORIENTATION,
            Channel::Pitch => ChannelSet::PITCH,
            Channel::Roll => ChannelSet::ROLL,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Orientation => write!(f, "orie"),
            Channel::Pitch => write!(f, "pitch"),
            Channel::Roll => write!(f, "roll"),
        }
    }
}

// ── Actuators ────────────────────────────────────────────────────

/// Operator-set actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuator {
    /// Gripper opening, `0..=999`.
    Gripper,
    /// Arm height, `-1.0..=1.0`.
    Height,
}

impl Actuator {
    /// Closed interval accepted for this actuator.
    pub fn range(self) -> (f64, f64) {
        match self {
            Actuator::Gripper => (0.0, 999.0),
            Actuator::Height => (-1.0, 1.0),
        }
    }

    /// Clamp `value` into [`Actuator::range`]. NaN maps to the lower bound.
    pub fn clamp(self, value: f64) -> f64 {
        let (lo, hi) = self.range();
        if value.is_nan() {
            return lo;
        }
        value.clamp(lo, hi)
    }
}

// ── PrecisionMode ────────────────────────────────────────────────

/// Numeric formatting width used when encoding telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrecisionMode {
    /// 3 decimal digits.
    #[default]
    Standard,
    /// 6 decimal digits.
    High,
}

impl PrecisionMode {
    pub fn from_high(high: bool) -> Self {
        if high {
            PrecisionMode::High
        } else {
            PrecisionMode::Standard
        }
    }

    pub fn decimals(self) -> usize {
        match self {
            PrecisionMode::Standard => 3,
            PrecisionMode::High => 6,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            PrecisionMode::Standard => PrecisionMode::High,
            PrecisionMode::High => PrecisionMode::Standard,
        }
    }
}

// ── State ────────────────────────────────────────────────────────

/// Cumulative change per channel since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationDelta {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Operator-set actuator values. Never touched by sensor input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ActuatorState {
    pub gripper: f64,
    pub height: f64,
}

/// Immutable copy of everything needed to encode one telemetry line.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub delta: OrientationDelta,
    pub actuators: ActuatorState,
    pub precision: PrecisionMode,
}

// ── DeltaAggregator ──────────────────────────────────────────────

/// Accumulates gated motion deltas and holds actuator set-points.
#[derive(Debug, Clone, Default)]
pub struct DeltaAggregator {
    delta: OrientationDelta,
    actuators: ActuatorState,
    precision: PrecisionMode,
    enabled: ChannelSet,
    last_sample: Option<MotionSample>,
}

impl DeltaAggregator {
    /// All channels enabled, zeroed accumulators, no baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample into the accumulators.
    ///
    /// The first sample after construction, [`reset`](Self::reset) or
    /// [`clear_baseline`](Self::clear_baseline) only establishes the
    /// baseline and contributes a zero delta.
    pub fn apply_sample(&mut self, sample: MotionSample) {
        if let Some(prev) = self.last_sample {
            self.accumulate(&prev, &sample);
        }
        self.advance_baseline(sample);
    }

    /// Add `current - previous` to every enabled channel.
    fn accumulate(&mut self, previous: &MotionSample, current: &MotionSample) {
        if self.enabled.contains(ChannelSet::ORIENTATION) {
            self.delta.x += current.quat_x - previous.quat_x;
            self.delta.y += current.quat_y - previous.quat_y;
            self.delta.z += current.quat_z - previous.quat_z;
        }
        if self.enabled.contains(ChannelSet::PITCH) {
            self.delta.pitch += current.pitch - previous.pitch;
        }
        if self.enabled.contains(ChannelSet::ROLL) {
            self.delta.roll += current.roll - previous.roll;
        }
    }

    /// Replace the baseline regardless of channel gates.
    fn advance_baseline(&mut self, sample: MotionSample) {
        self.last_sample = Some(sample);
    }

    /// Forget the baseline without touching accumulated values.
    ///
    /// Used when sampling stops so a later restart does not produce a
    /// jump spanning the pause.
    pub fn clear_baseline(&mut self) {
        self.last_sample = None;
    }

    pub fn set_channel_enabled(&mut self, channel: Channel, enabled: bool) {
        self.enabled.set(channel.flag(), enabled);
    }

    /// Flip a channel gate and return its new state.
    pub fn toggle_channel(&mut self, channel: Channel) -> bool {
        self.enabled.toggle(channel.flag());
        self.is_enabled(channel)
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled.contains(channel.flag())
    }

    pub fn channels(&self) -> ChannelSet {
        self.enabled
    }

    /// Store a clamped actuator value and return what was stored.
    pub fn set_actuator(&mut self, actuator: Actuator, value: f64) -> f64 {
        let clamped = actuator.clamp(value);
        match actuator {
            Actuator::Gripper => self.actuators.gripper = clamped,
            Actuator::Height => self.actuators.height = clamped,
        }
        clamped
    }

    pub fn set_precision(&mut self, precision: PrecisionMode) {
        self.precision = precision;
    }

    pub fn precision(&self) -> PrecisionMode {
        self.precision
    }

    /// Zero every motion accumulator and drop the baseline.
    ///
    /// Actuator set-points and channel gates are kept. Returns the
    /// zeroed snapshot so the caller can queue it right away.
    pub fn reset(&mut self) -> Snapshot {
        self.delta = OrientationDelta::default();
        self.last_sample = None;
        self.snapshot()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            delta: self.delta,
            actuators: self.actuators,
            precision: self.precision,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn orie_x(x: f64) -> MotionSample {
        MotionSample::new(x, 0.0, 0.0, 0.0, 0.0)
    }

    fn wobble(n: usize) -> Vec<MotionSample> {
        (0..n)
            .map(|i| {
                let t = i as f64 * 0.1;
                MotionSample::new(t.sin(), t.cos(), 0.5 * t, -t, t * t)
            })
            .collect()
    }

    #[test]
    fn accumulates_frame_to_frame_deltas() {
        let mut agg = DeltaAggregator::new();
        for x in [0.10, 0.12, 0.09] {
            agg.apply_sample(orie_x(x));
        }
        assert!((agg.snapshot().delta.x - (-0.01)).abs() < EPS);
    }

    #[test]
    fn first_sample_only_sets_baseline() {
        let mut agg = DeltaAggregator::new();
        agg.apply_sample(MotionSample::new(0.7, 0.3, 0.2, 1.0, -1.0));
        assert_eq!(agg.snapshot().delta, OrientationDelta::default());
    }

    #[test]
    fn disabled_channel_never_changes() {
        let mut agg = DeltaAggregator::new();
        agg.set_channel_enabled(Channel::Pitch, false);
        for s in wobble(50) {
            agg.apply_sample(s);
        }
        let snap = agg.snapshot();
        assert_eq!(snap.delta.pitch, 0.0);
        assert!(snap.delta.roll != 0.0);
        assert!(snap.delta.x != 0.0);
    }

    #[test]
    fn reenabled_channel_does_not_catch_up() {
        let mut agg = DeltaAggregator::new();
        agg.apply_sample(orie_x(0.0));
        agg.apply_sample(orie_x(0.1));

        agg.set_channel_enabled(Channel::Orientation, false);
        agg.apply_sample(orie_x(0.5));
        agg.apply_sample(orie_x(0.9));
        assert!((agg.snapshot().delta.x - 0.1).abs() < EPS);

        agg.set_channel_enabled(Channel::Orientation, true);
        agg.apply_sample(orie_x(1.0));
        // Only 0.9 -> 1.0 counts after re-enabling.
        assert!((agg.snapshot().delta.x - 0.2).abs() < EPS);
    }

    #[test]
    fn toggle_leaves_accumulated_values() {
        let mut agg = DeltaAggregator::new();
        agg.apply_sample(MotionSample::new(0.0, 0.0, 0.0, 0.0, 0.0));
        agg.apply_sample(MotionSample::new(0.0, 0.0, 0.0, 0.0, 0.25));
        assert!(!agg.toggle_channel(Channel::Roll));
        assert!((agg.snapshot().delta.roll - 0.25).abs() < EPS);
        assert!(agg.toggle_channel(Channel::Roll));
        assert!((agg.snapshot().delta.roll - 0.25).abs() < EPS);
    }

    #[test]
    fn reset_matches_fresh_aggregator() {
        let samples = wobble(40);

        let mut fresh = DeltaAggregator::new();
        for s in &samples {
            fresh.apply_sample(*s);
        }

        let mut reused = DeltaAggregator::new();
        for s in wobble(17).iter().rev() {
            reused.apply_sample(*s);
        }
        let zeroed = reused.reset();
        assert_eq!(zeroed.delta, OrientationDelta::default());
        for s in &samples {
            reused.apply_sample(*s);
        }

        assert_eq!(fresh.snapshot().delta, reused.snapshot().delta);
    }

    #[test]
    fn reset_keeps_actuators_and_gates() {
        let mut agg = DeltaAggregator::new();
        agg.set_actuator(Actuator::Gripper, 420.0);
        agg.set_channel_enabled(Channel::Roll, false);
        let snap = agg.reset();
        assert_eq!(snap.actuators.gripper, 420.0);
        assert!(!agg.is_enabled(Channel::Roll));
    }

    #[test]
    fn actuator_clamping() {
        let mut agg = DeltaAggregator::new();
        assert_eq!(agg.set_actuator(Actuator::Gripper, 1000.0), 999.0);
        assert_eq!(agg.set_actuator(Actuator::Gripper, -5.0), 0.0);
        assert_eq!(agg.set_actuator(Actuator::Height, 1.5), 1.0);
        assert_eq!(agg.set_actuator(Actuator::Height, -0.25), -0.25);
        assert_eq!(agg.set_actuator(Actuator::Height, f64::NAN), -1.0);
        assert_eq!(agg.snapshot().actuators.height, -1.0);
    }

    #[test]
    fn samples_never_touch_actuators() {
        let mut agg = DeltaAggregator::new();
        agg.set_actuator(Actuator::Height, 0.5);
        for s in wobble(10) {
            agg.apply_sample(s);
        }
        assert_eq!(agg.snapshot().actuators.height, 0.5);
        assert_eq!(agg.snapshot().actuators.gripper, 0.0);
    }

    #[test]
    fn clear_baseline_skips_pause_gap() {
        let mut agg = DeltaAggregator::new();
        agg.apply_sample(orie_x(0.0));
        agg.apply_sample(orie_x(0.1));
        agg.clear_baseline();
        agg.apply_sample(orie_x(5.0));
        assert!((agg.snapshot().delta.x - 0.1).abs() < EPS);
    }

    #[test]
    fn precision_is_carried_in_snapshot() {
        let mut agg = DeltaAggregator::new();
        assert_eq!(agg.snapshot().precision, PrecisionMode::Standard);
        agg.set_precision(PrecisionMode::High);
        assert_eq!(agg.snapshot().precision, PrecisionMode::High);
        assert_eq!(PrecisionMode::High.toggled(), PrecisionMode::Standard);
    }
}
