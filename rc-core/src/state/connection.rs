//! Connection lifecycle state machine.
//!
//! Provides a `ConnectionState` enum that models the full lifecycle of
//! the link to the controller endpoint, with validated transitions that
//! return `Result` instead of panicking.

use std::time::Instant;

use crate::error::RcError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current state of the controller link.
///
/// ```text
///  Disconnected ──► Connecting ──► AwaitingHandshake ──► Streaming
///       ▲  ▲             │                 │                 │
///       │  │             ▼                 ▼                 │
///       │  └──────────  Faulted ◄──────────┴─────────────────┤
///       │                                                    │
///       └──────────────── (explicit disconnect) ◄────────────┘
/// ```
///
/// `Faulted` only leaves through a fresh connect request or an
/// explicit disconnect; nothing retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No link. Initial state.
    #[default]
    Disconnected,

    /// Transport open requested, not yet accepted.
    Connecting,

    /// Transport open, probe sent, waiting for the handshake token.
    AwaitingHandshake,

    /// Handshake complete; telemetry may be sent.
    Streaming {
        /// When the link entered `Streaming`.
        since: Instant,
    },

    /// The last attempt or session failed.
    Faulted,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl ConnectionState {
    /// Static name, used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::AwaitingHandshake => "AwaitingHandshake",
            Self::Streaming { .. } => "Streaming",
            Self::Faulted => "Faulted",
        }
    }

    /// `true` only in `Streaming`. This is the `isConnected` flag shown
    /// to the operator.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming { .. })
    }

    /// `true` while inbound frames should be dispatched.
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::AwaitingHandshake | Self::Streaming { .. })
    }

    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Faulted)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// How long the link has been streaming.
    ///
    /// Returns `None` for any other state.
    pub fn streaming_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Streaming { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`, `Faulted`.
    pub fn begin_connect(&mut self) -> Result<(), RcError> {
        match self {
            Self::Disconnected | Self::Faulted => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(RcError::InvalidTransition(
                "cannot connect: a connection is already active",
            )),
        }
    }

    /// Transition to `AwaitingHandshake`.
    ///
    /// Valid from: `Connecting`.
    pub fn await_handshake(&mut self) -> Result<(), RcError> {
        match self {
            Self::Connecting => {
                *self = Self::AwaitingHandshake;
                Ok(())
            }
            _ => Err(RcError::InvalidTransition(
                "cannot await handshake: not in Connecting state",
            )),
        }
    }

    /// Transition to `Streaming`.
    ///
    /// Valid from: `AwaitingHandshake`.
    pub fn begin_streaming(&mut self) -> Result<(), RcError> {
        match self {
            Self::AwaitingHandshake => {
                *self = Self::Streaming {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(RcError::InvalidTransition(
                "cannot start streaming: not in AwaitingHandshake state",
            )),
        }
    }

    /// Transition to `Disconnected` on an explicit request.
    ///
    /// Valid from anything except `Connecting`.
    pub fn finish_disconnect(&mut self) -> Result<(), RcError> {
        match self {
            Self::Connecting => Err(RcError::InvalidTransition(
                "cannot disconnect: connect still in progress",
            )),
            _ => {
                *self = Self::Disconnected;
                Ok(())
            }
        }
    }

    /// Force `Faulted` regardless of current state.
    ///
    /// Use this for any failure: bad endpoint, open failure, handshake
    /// rejection, mid-stream drop.
    pub fn fault(&mut self) {
        *self = Self::Faulted;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::Disconnected;

        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);

        state.await_handshake().unwrap();
        assert_eq!(state, ConnectionState::AwaitingHandshake);
        assert!(state.is_listening());
        assert!(!state.is_streaming());

        state.begin_streaming().unwrap();
        assert!(state.is_streaming());
        assert!(state.streaming_duration().is_some());

        state.finish_disconnect().unwrap();
        assert!(state.is_disconnected());
        assert!(!state.is_listening());
    }

    #[test]
    fn reconnect_from_faulted() {
        let mut state = ConnectionState::AwaitingHandshake;
        state.fault();
        assert!(state.is_faulted());
        state.begin_connect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);
    }

    #[test]
    fn invalid_transition_connect_when_streaming() {
        let mut state = ConnectionState::Streaming {
            since: Instant::now(),
        };
        assert!(matches!(
            state.begin_connect(),
            Err(RcError::InvalidTransition(_))
        ));
        assert!(state.is_streaming());
    }

    #[test]
    fn invalid_transition_stream_without_handshake() {
        let mut state = ConnectionState::Connecting;
        assert!(state.begin_streaming().is_err());
        let mut state = ConnectionState::Disconnected;
        assert!(state.await_handshake().is_err());
    }

    #[test]
    fn disconnect_rejected_mid_connect() {
        let mut state = ConnectionState::Connecting;
        assert!(state.finish_disconnect().is_err());
    }

    #[test]
    fn disconnect_clears_fault() {
        let mut state = ConnectionState::Faulted;
        state.finish_disconnect().unwrap();
        assert!(state.is_disconnected());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(
            ConnectionState::AwaitingHandshake.to_string(),
            "AwaitingHandshake"
        );
        assert_eq!(
            ConnectionState::Streaming {
                since: Instant::now()
            }
            .to_string(),
            "Streaming"
        );
        assert_eq!(ConnectionState::Faulted.to_string(), "Faulted");
    }

    #[test]
    fn default_state_is_disconnected() {
        assert!(ConnectionState::default().is_disconnected());
    }
}
