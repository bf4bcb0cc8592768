//! Ack-gated outbound pacing.
//!
//! At most one telemetry line is unacknowledged at any time. Snapshots
//! offered while a line is in flight overwrite whatever is pending, so
//! the line sent after the next `"received"` always carries the latest
//! aggregated state.
//!
//! ```text
//!   offer(snap) ──► OutboundQueue (cap 1, overwrite) ──► dispatch ──► link
//!                                        ▲                  │
//!                         on_ack() ──────┘   in_flight = true
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::aggregator::Snapshot;
use crate::codec::ProtocolCodec;
use crate::delay::DelayTracker;
use crate::error::RcError;

/// Only the newest snapshot is ever worth sending.
pub const LATEST_ONLY: usize = 1;

// ── TelemetryLink ────────────────────────────────────────────────

/// The transport as seen by the scheduler.
#[async_trait]
pub trait TelemetryLink: Send {
    /// `true` while sends are allowed.
    fn is_streaming(&self) -> bool;

    /// Name of the current connection state, for `NotConnected`.
    fn state_name(&self) -> &'static str;

    async fn send_text(&mut self, text: String) -> Result<(), RcError>;
}

// ── OutboundQueue ────────────────────────────────────────────────

/// Bounded FIFO that drops its oldest entry when full.
#[derive(Debug, Clone)]
pub struct OutboundQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    dropped: u64,
}

impl<T> OutboundQueue<T> {
    /// `capacity` is raised to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append `item`, evicting the oldest entry if full. Returns the
    /// evicted entry.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Discard everything pending and return how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

// ── OutboundScheduler ────────────────────────────────────────────

/// Turns offered snapshots into paced sends, one in flight at a time.
#[derive(Debug)]
pub struct OutboundScheduler {
    queue: OutboundQueue<Snapshot>,
    in_flight: bool,
    sent: u64,
    acked: u64,
}

impl Default for OutboundScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundScheduler {
    pub fn new() -> Self {
        Self {
            queue: OutboundQueue::new(LATEST_ONLY),
            in_flight: false,
            sent: 0,
            acked: 0,
        }
    }

    /// Queue a snapshot; supersedes anything not yet sent.
    pub fn offer(&mut self, snapshot: Snapshot) {
        if self.queue.push(snapshot).is_some() {
            trace!("superseded pending snapshot");
        }
    }

    /// Record an ack. Acks with nothing in flight are ignored and
    /// return `false`.
    pub fn on_ack(&mut self) -> bool {
        if !self.in_flight {
            debug!("ack with nothing in flight");
            return false;
        }
        self.in_flight = false;
        self.acked += 1;
        true
    }

    /// Send the pending snapshot if the gate is open.
    ///
    /// Returns `Ok(true)` when a line was written, `Ok(false)` when
    /// waiting on an ack or nothing is pending, and `NotConnected` if a
    /// send is due but the link is not streaming. On `NotConnected` the
    /// snapshot stays queued.
    pub async fn dispatch<L: TelemetryLink + ?Sized>(
        &mut self,
        link: &mut L,
        delay: &mut DelayTracker,
    ) -> Result<bool, RcError> {
        if self.in_flight || self.queue.is_empty() {
            return Ok(false);
        }
        if !link.is_streaming() {
            return Err(RcError::NotConnected(link.state_name()));
        }
        let Some(snapshot) = self.queue.pop() else {
            return Ok(false);
        };

        let line = ProtocolCodec::encode(&snapshot);
        delay.mark_sent();
        if let Err(e) = link.send_text(line).await {
            delay.reset_baseline();
            return Err(e);
        }
        self.in_flight = true;
        self.sent += 1;
        trace!(sent = self.sent, "telemetry sent");
        Ok(true)
    }

    /// Drop pending snapshots and forget the in-flight line.
    ///
    /// Called on disconnect and on any link failure; nothing queued is
    /// ever flushed afterwards.
    pub fn clear(&mut self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded pending telemetry");
        }
        self.in_flight = false;
    }

    /// Fresh counters for a new streaming session.
    pub fn restart(&mut self) {
        self.clear();
        self.sent = 0;
        self.acked = 0;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    pub fn acked_count(&self) -> u64 {
        self.acked
    }

    /// Snapshots superseded before they could be sent.
    pub fn superseded_count(&self) -> u64 {
        self.queue.dropped()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{ActuatorState, PrecisionMode};

    /// In-memory link that records every line.
    #[derive(Default)]
    struct RecordingLink {
        streaming: bool,
        fail_next: bool,
        lines: Vec<String>,
    }

    impl RecordingLink {
        fn streaming() -> Self {
            Self {
                streaming: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl TelemetryLink for RecordingLink {
        fn is_streaming(&self) -> bool {
            self.streaming
        }

        fn state_name(&self) -> &'static str {
            if self.streaming { "Streaming" } else { "Disconnected" }
        }

        async fn send_text(&mut self, text: String) -> Result<(), RcError> {
            if self.fail_next {
                self.fail_next = false;
                self.streaming = false;
                return Err(RcError::TransportSendFailure("broken pipe".into()));
            }
            self.lines.push(text);
            Ok(())
        }
    }

    fn gripper(v: f64) -> Snapshot {
        Snapshot {
            actuators: ActuatorState {
                gripper: v,
                height: 0.0,
            },
            precision: PrecisionMode::Standard,
            ..Default::default()
        }
    }

    #[test]
    fn queue_overwrites_oldest() {
        let mut q = OutboundQueue::new(2);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.push(3), Some(1));
        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn queue_capacity_is_at_least_one() {
        let mut q = OutboundQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.push("a");
        q.push("b");
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some("b"));
    }

    #[tokio::test]
    async fn one_line_in_flight() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::streaming();
        let mut delay = DelayTracker::new();

        sched.offer(gripper(1.0));
        assert!(sched.dispatch(&mut link, &mut delay).await.unwrap());
        assert!(sched.is_in_flight());
        assert!(delay.is_pending());

        sched.offer(gripper(2.0));
        assert!(!sched.dispatch(&mut link, &mut delay).await.unwrap());
        assert_eq!(link.lines.len(), 1);
        assert_eq!(sched.pending(), 1);
    }

    #[tokio::test]
    async fn ack_releases_latest_snapshot() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::streaming();
        let mut delay = DelayTracker::new();

        sched.offer(gripper(1.0));
        sched.dispatch(&mut link, &mut delay).await.unwrap();
        for v in [2.0, 3.0, 4.0] {
            sched.offer(gripper(v));
        }
        assert_eq!(sched.superseded_count(), 2);

        assert!(sched.on_ack());
        assert!(sched.dispatch(&mut link, &mut delay).await.unwrap());
        assert_eq!(link.lines.len(), 2);
        assert!(link.lines[1].contains("Gripper=4,"));
    }

    #[tokio::test]
    async fn send_and_ack_counts_never_drift() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::streaming();
        let mut delay = DelayTracker::new();

        for i in 0..200u32 {
            sched.offer(gripper(f64::from(i % 999)));
            sched.dispatch(&mut link, &mut delay).await.unwrap();
            // Peer acks every third step, sometimes twice.
            if i % 3 == 0 {
                sched.on_ack();
                sched.on_ack();
            }
            let gap = sched.sent_count() - sched.acked_count();
            assert!(gap <= 1, "gap {gap} at step {i}");
        }
    }

    #[tokio::test]
    async fn dispatch_rejected_when_not_streaming() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::default();
        let mut delay = DelayTracker::new();

        sched.offer(gripper(1.0));
        let err = sched.dispatch(&mut link, &mut delay).await.unwrap_err();
        assert!(matches!(err, RcError::NotConnected("Disconnected")));
        assert_eq!(sched.pending(), 1);
        assert!(link.lines.is_empty());
    }

    #[tokio::test]
    async fn clear_discards_queued_snapshot() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::streaming();
        let mut delay = DelayTracker::new();

        sched.offer(gripper(1.0));
        sched.dispatch(&mut link, &mut delay).await.unwrap();
        sched.offer(gripper(2.0));

        sched.clear();
        link.streaming = false;
        assert_eq!(sched.pending(), 0);
        assert!(!sched.is_in_flight());
        assert!(!sched.dispatch(&mut link, &mut delay).await.unwrap());
        assert_eq!(link.lines.len(), 1);
    }

    #[tokio::test]
    async fn failed_send_keeps_gate_open() {
        let mut sched = OutboundScheduler::new();
        let mut link = RecordingLink::streaming();
        link.fail_next = true;
        let mut delay = DelayTracker::new();

        sched.offer(gripper(1.0));
        let err = sched.dispatch(&mut link, &mut delay).await;
        tokio_test::assert_err!(err);
        assert!(!sched.is_in_flight());
        assert!(!delay.is_pending());
        assert_eq!(sched.sent_count(), 0);
    }

    #[test]
    fn stray_ack_is_ignored() {
        let mut sched = OutboundScheduler::new();
        assert!(!sched.on_ack());
        assert_eq!(sched.acked_count(), 0);
    }
}
