//! Text wire format.
//!
//! One message per WebSocket text frame, no continuation:
//!
//! ```text
//! client → peer   "Test Connection"
//! client → peer   "Data: OrieX=<f>, OrieY=<f>, OrieZ=<f>, Pitch=<f>, Roll=<f>, Gripper=<i>, Height=<f>"
//! peer → client   "Connection Established" | "received" | anything else (informational)
//! ```

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::aggregator::Snapshot;
use crate::error::RcError;

/// Probe sent once right after the transport opens.
pub const PROBE: &str = "Test Connection";
/// Handshake success token.
pub const HANDSHAKE_OK: &str = "Connection Established";
/// Acknowledgement of the last telemetry line.
pub const ACK: &str = "received";
/// Prefix of every telemetry line.
pub const DATA_PREFIX: &str = "Data: ";

const FIELD_LABELS: [&str; 7] = [
    "OrieX", "OrieY", "OrieZ", "Pitch", "Roll", "Gripper", "Height",
];

// ── InboundMessage ───────────────────────────────────────────────

/// A decoded peer → client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// `"Connection Established"`.
    HandshakeOk,
    /// `"received"`.
    Ack,
    /// Anything else. Logged, no state effect.
    Other(String),
}

// ── TelemetryFrame ───────────────────────────────────────────────

/// A parsed `Data:` line, as seen by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TelemetryFrame {
    pub orie_x: f64,
    pub orie_y: f64,
    pub orie_z: f64,
    pub pitch: f64,
    pub roll: f64,
    pub gripper: i64,
    pub height: f64,
}

// ── ProtocolCodec ────────────────────────────────────────────────

/// Stateless translator between snapshots/events and wire text.
pub struct ProtocolCodec;

impl ProtocolCodec {
    /// Encode a snapshot as a single telemetry line.
    ///
    /// Reals use the snapshot's precision; the gripper is truncated.
    pub fn encode(snapshot: &Snapshot) -> String {
        let p = snapshot.precision.decimals();
        let d = &snapshot.delta;
        let a = &snapshot.actuators;
        let mut line = String::with_capacity(128);
        let _ = write!(
            line,
            "{DATA_PREFIX}OrieX={:.p$}, OrieY={:.p$}, OrieZ={:.p$}, Pitch={:.p$}, Roll={:.p$}, Gripper={}, Height={:.p$}",
            d.x,
            d.y,
            d.z,
            d.pitch,
            d.roll,
            a.gripper.trunc() as i64,
            a.height,
        );
        line
    }

    /// Classify one inbound frame. Tokens are matched verbatim.
    pub fn decode(text: &str) -> InboundMessage {
        match text {
            HANDSHAKE_OK => InboundMessage::HandshakeOk,
            ACK => InboundMessage::Ack,
            other => InboundMessage::Other(other.to_string()),
        }
    }

    /// Parse a telemetry line back into its fields.
    ///
    /// Labels may appear in any order but each exactly once.
    pub fn parse_telemetry(line: &str) -> Result<TelemetryFrame, RcError> {
        let body = line
            .strip_prefix(DATA_PREFIX)
            .ok_or_else(|| RcError::MalformedTelemetry("missing \"Data: \" prefix".into()))?;

        let mut values: [Option<f64>; 7] = [None; 7];
        for entry in body.split(", ") {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| RcError::MalformedTelemetry(format!("no '=' in {entry:?}")))?;
            let key = key.trim();
            let idx = FIELD_LABELS
                .iter()
                .position(|label| *label == key)
                .ok_or_else(|| RcError::MalformedTelemetry(format!("unknown field {key:?}")))?;
            if values[idx].is_some() {
                return Err(RcError::MalformedTelemetry(format!("duplicate field {key:?}")));
            }
            let parsed: f64 = value.trim().parse().map_err(|_| {
                RcError::MalformedTelemetry(format!("{key} is not a number: {value:?}"))
            })?;
            values[idx] = Some(parsed);
        }

        let mut fields = [0.0; 7];
        for (idx, slot) in values.iter().enumerate() {
            fields[idx] = slot.ok_or_else(|| {
                RcError::MalformedTelemetry(format!("missing field {:?}", FIELD_LABELS[idx]))
            })?;
        }

        Ok(TelemetryFrame {
            orie_x: fields[0],
            orie_y: fields[1],
            orie_z: fields[2],
            pitch: fields[3],
            roll: fields[4],
            gripper: fields[5].trunc() as i64,
            height: fields[6],
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
