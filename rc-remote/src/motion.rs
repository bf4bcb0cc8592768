//! Motion sources feeding the session.
//!
//! The handheld has no real IMU here, so samples come either from a
//! deterministic simulator or from a recorded JSON-lines file that is
//! replayed in a loop.

use std::path::Path;
use std::time::Duration;

use rc_core::{MotionSample, SessionHandle};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Something that yields orientation samples on demand.
pub trait MotionSource: Send {
    fn next_sample(&mut self) -> MotionSample;
}

// ── SimulatedMotion ──────────────────────────────────────────────

/// Slow, bounded oscillation on every axis.
#[derive(Debug, Clone)]
pub struct SimulatedMotion {
    step: u64,
    /// Radians advanced per sample.
    rate: f64,
}

impl SimulatedMotion {
    pub fn new(rate: f64) -> Self {
        Self { step: 0, rate }
    }
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl MotionSource for SimulatedMotion {
    fn next_sample(&mut self) -> MotionSample {
        let t = self.step as f64 * self.rate;
        self.step += 1;
        MotionSample::new(
            0.10 * t.sin(),
            0.05 * (0.7 * t).sin(),
            0.08 * (1.3 * t).cos(),
            0.30 * (0.5 * t).sin(),
            0.25 * (0.9 * t).cos(),
        )
    }
}

// ── ReplayMotion ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot read replay file: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("replay file has no samples")]
    Empty,
}

/// Recorded samples played back in order, wrapping at the end.
#[derive(Debug, Clone)]
pub struct ReplayMotion {
    samples: Vec<MotionSample>,
    cursor: usize,
}

impl ReplayMotion {
    /// One JSON object per line. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, ReplayError> {
        let mut samples = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let sample = serde_json::from_str(line).map_err(|source| ReplayError::Parse {
                line: idx + 1,
                source,
            })?;
            samples.push(sample);
        }
        if samples.is_empty() {
            return Err(ReplayError::Empty);
        }
        Ok(Self { samples, cursor: 0 })
    }

    pub fn load(path: &Path) -> Result<Self, ReplayError> {
        let text = std::fs::read_to_string(path)?;
        let replay = Self::parse(&text)?;
        info!(path = %path.display(), samples = replay.len(), "replay loaded");
        Ok(replay)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl MotionSource for ReplayMotion {
    fn next_sample(&mut self) -> MotionSample {
        let sample = self.samples[self.cursor];
        self.cursor = (self.cursor + 1) % self.samples.len();
        sample
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Push one sample per `period` into the session until it goes away.
///
/// The session drops samples while sampling is off, so the driver
/// never needs to know about the sensors switch.
pub fn spawn_motion(
    handle: SessionHandle,
    mut source: Box<dyn MotionSource>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if handle.sample(source.next_sample()).await.is_err() {
                debug!("session closed; motion driver stopping");
                break;
            }
        }
    })
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::{Session, SessionOptions};

    #[test]
    fn simulator_is_deterministic_and_bounded() {
        let mut a = SimulatedMotion::default();
        let mut b = SimulatedMotion::default();
        for _ in 0..500 {
            let (sa, sb) = (a.next_sample(), b.next_sample());
            assert_eq!(sa, sb);
            assert!(sa.quat_x.abs() <= 0.1);
            assert!(sa.pitch.abs() <= 0.3);
        }
    }

    #[test]
    fn replay_wraps_around() {
        let text = r#"
            # recorded on the bench
            {"quat_x":0.1,"quat_y":0.0,"quat_z":0.0,"pitch":0.0,"roll":0.0}

            {"quat_x":0.2,"quat_y":0.0,"quat_z":0.0,"pitch":0.0,"roll":0.0}
        "#;
        let mut replay = ReplayMotion::parse(text).unwrap();
        assert_eq!(replay.len(), 2);
        let xs: Vec<f64> = (0..5).map(|_| replay.next_sample().quat_x).collect();
        assert_eq!(xs, [0.1, 0.2, 0.1, 0.2, 0.1]);
    }

    #[test]
    fn replay_reports_bad_line() {
        let text = "{\"quat_x\":0.1,\"quat_y\":0,\"quat_z\":0,\"pitch\":0,\"roll\":0}\nnot json\n";
        let err = ReplayMotion::parse(text).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn empty_replay_is_rejected() {
        assert!(matches!(
            ReplayMotion::parse("\n# nothing\n"),
            Err(ReplayError::Empty)
        ));
    }

    #[tokio::test]
    async fn driver_feeds_session() {
        let (handle, task) = Session::spawn(SessionOptions {
            sampling: true,
            ..Default::default()
        });
        let driver = spawn_motion(
            handle.clone(),
            Box::new(SimulatedMotion::new(0.5)),
            Duration::from_millis(5),
        );

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.snapshot.delta.x != 0.0),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(status.sampling);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), driver)
            .await
            .unwrap()
            .unwrap();
    }
}
