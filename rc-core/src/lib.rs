//! # rc-core
//!
//! Streaming core of the RC Remote handheld client.
//!
//! This crate contains:
//! - **Aggregator**: `DeltaAggregator`, per-channel gated motion deltas plus actuator set-points
//! - **Codec**: `ProtocolCodec` for the line-oriented text protocol
//! - **State**: `ConnectionState` lifecycle machine with validated transitions
//! - **Network**: `ConnectionManager` owning the WebSocket link and handshake
//! - **Scheduler**: `OutboundScheduler`, ack-gated pacing over a latest-only queue
//! - **Delay**: `DelayTracker`, round-trip estimate from acks
//! - **Session**: the single task that owns and serialises all of the above
//! - **Peer**: a reference controller endpoint
//! - **Error**: `RcError`, typed, `thiserror`-based error hierarchy

pub mod aggregator;
pub mod codec;
pub mod delay;
pub mod error;
pub mod network;
pub mod peer;
pub mod scheduler;
pub mod session;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use aggregator::{
    Actuator, ActuatorState, Channel, ChannelSet, DeltaAggregator, MotionSample,
    OrientationDelta, PrecisionMode, Snapshot,
};
pub use codec::{InboundMessage, ProtocolCodec, TelemetryFrame};
pub use delay::DelayTracker;
pub use error::{EndpointError, RcError};
pub use network::{ConnectionManager, Endpoint, InboundEvent, InboundKind};
pub use peer::{PeerEvent, PeerOptions, PeerServer};
pub use scheduler::{OutboundQueue, OutboundScheduler, TelemetryLink};
pub use session::{Session, SessionCommand, SessionHandle, SessionOptions, SessionStatus};
pub use state::ConnectionState;
