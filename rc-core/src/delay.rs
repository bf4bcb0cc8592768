//! Round-trip delay tracking for the ack-gated stream.
//!
//! Stamps each telemetry send and turns the matching `"received"` ack
//! into a whole-millisecond round-trip estimate for the display.

use std::time::{Duration, Instant};

/// Last-send timestamp plus the most recently published round trip.
#[derive(Debug, Clone, Default)]
pub struct DelayTracker {
    /// Set right before a send, taken by the matching ack.
    last_send: Option<Instant>,
    /// Published estimate in milliseconds.
    delay_ms: u64,
    /// Number of acks that produced a measurement.
    samples: u64,
}

impl DelayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a send at the current instant.
    pub fn mark_sent(&mut self) {
        self.mark_sent_at(Instant::now());
    }

    /// Stamp a send with an explicit timestamp (useful for testing).
    pub fn mark_sent_at(&mut self, when: Instant) {
        self.last_send = Some(when);
    }

    /// Resolve the pending send against an ack arriving now.
    pub fn on_ack(&mut self) -> Option<u64> {
        self.on_ack_at(Instant::now())
    }

    /// Resolve the pending send against an ack at `when`.
    ///
    /// Returns the new estimate, or `None` if nothing was pending, in
    /// which case the published value is left as it was.
    pub fn on_ack_at(&mut self, when: Instant) -> Option<u64> {
        let sent = self.last_send.take()?;
        self.delay_ms = round_millis(when.saturating_duration_since(sent));
        self.samples += 1;
        Some(self.delay_ms)
    }

    /// Forget any pending send stamp. The published value is kept until
    /// the next ack replaces it.
    pub fn reset_baseline(&mut self) {
        self.last_send = None;
    }

    /// Current published round-trip estimate in milliseconds.
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// `true` while a send is waiting for its ack.
    pub fn is_pending(&self) -> bool {
        self.last_send.is_some()
    }

    pub fn sample_count(&self) -> u64 {
        self.samples
    }
}

fn round_millis(d: Duration) -> u64 {
    (d.as_secs_f64() * 1000.0).round() as u64
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_forty_ms_later() {
        let mut tracker = DelayTracker::new();
        let t0 = Instant::now();
        tracker.mark_sent_at(t0);
        assert_eq!(tracker.on_ack_at(t0 + Duration::from_millis(40)), Some(40));
        assert_eq!(tracker.delay_ms(), 40);
    }

    #[test]
    fn rounds_to_nearest_millisecond() {
        let mut tracker = DelayTracker::new();
        let t0 = Instant::now();
        tracker.mark_sent_at(t0);
        tracker.on_ack_at(t0 + Duration::from_micros(12_600));
        assert_eq!(tracker.delay_ms(), 13);

        tracker.mark_sent_at(t0);
        tracker.on_ack_at(t0 + Duration::from_micros(12_400));
        assert_eq!(tracker.delay_ms(), 12);
    }

    #[test]
    fn unmatched_ack_keeps_previous_value() {
        let mut tracker = DelayTracker::new();
        let t0 = Instant::now();
        tracker.mark_sent_at(t0);
        tracker.on_ack_at(t0 + Duration::from_millis(25));

        // Second ack with no send in between.
        assert_eq!(tracker.on_ack_at(t0 + Duration::from_millis(90)), None);
        assert_eq!(tracker.delay_ms(), 25);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn baseline_reset_keeps_published_value() {
        let mut tracker = DelayTracker::new();
        let t0 = Instant::now();
        tracker.mark_sent_at(t0);
        tracker.on_ack_at(t0 + Duration::from_millis(55));

        tracker.mark_sent_at(t0 + Duration::from_millis(60));
        tracker.reset_baseline();
        assert!(!tracker.is_pending());
        assert_eq!(tracker.on_ack(), None);
        assert_eq!(tracker.delay_ms(), 55);
    }

    #[test]
    fn starts_at_zero() {
        let tracker = DelayTracker::new();
        assert_eq!(tracker.delay_ms(), 0);
        assert!(!tracker.is_pending());
    }
}
