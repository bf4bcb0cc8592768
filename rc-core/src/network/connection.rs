use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::codec::{InboundMessage, PROBE, ProtocolCodec};
use crate::error::RcError;
use crate::network::Endpoint;
use crate::scheduler::TelemetryLink;
use crate::state::ConnectionState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a graceful close may take before the link is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── Inbound events ───────────────────────────────────────────────

/// Something the background reader saw on the link.
///
/// `generation` identifies the link that produced it, so events still
/// queued from a torn-down link are never dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub generation: u64,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// One text frame.
    Frame(String),
    /// The link failed or the peer closed it. Always the last event.
    Failed(String),
}

// ── ConnectionManager ────────────────────────────────────────────

/// A live WebSocket link: writer half plus the background reader.
struct Link {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

/// Owns the connection state machine and the physical socket.
///
/// Inbound frames are read by a background task and handed to the
/// owner through `inbound_tx`; the owner feeds them back through
/// [`handle_inbound`](Self::handle_inbound), so every state change
/// happens on the owner's task.
pub struct ConnectionManager {
    state: ConnectionState,
    link: Option<Link>,
    inbound_tx: mpsc::Sender<InboundEvent>,
    open_timeout: Duration,
    /// Bumped on every successful transport open.
    generation: u64,
}

impl ConnectionManager {
    pub fn new(inbound_tx: mpsc::Sender<InboundEvent>, open_timeout: Duration) -> Self {
        Self {
            state: ConnectionState::default(),
            link: None,
            inbound_tx,
            open_timeout,
            generation: 0,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_streaming()
    }

    /// Generation of the current link (0 before the first open).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open the link and send the handshake probe.
    ///
    /// On success the state is `AwaitingHandshake`; the handshake itself
    /// completes later through [`handle_inbound`](Self::handle_inbound).
    /// On any failure the state is `Faulted` and no link is kept.
    pub async fn connect(&mut self, address: &str, port: &str) -> Result<Endpoint, RcError> {
        self.state.begin_connect()?;

        let endpoint = match Endpoint::parse(address, port) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.state.fault();
                return Err(e.into());
            }
        };

        info!(%endpoint, "opening link");
        let opened = tokio::time::timeout(self.open_timeout, connect_async(endpoint.url())).await;
        let stream = match opened {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                self.state.fault();
                return Err(RcError::TransportOpenFailure(e.to_string()));
            }
            Err(_) => {
                self.state.fault();
                return Err(RcError::TransportOpenFailure(format!(
                    "no answer from {endpoint} within {:?}",
                    self.open_timeout
                )));
            }
        };

        let (sink, stream) = stream.split();
        self.generation += 1;
        let reader = tokio::spawn(listen(stream, self.generation, self.inbound_tx.clone()));
        self.link = Some(Link { sink, reader });
        self.state.await_handshake()?;

        if let Err(e) = self.write(PROBE.to_string()).await {
            self.drop_link();
            self.state.fault();
            return Err(e);
        }
        debug!(generation = self.generation, "probe sent");
        Ok(endpoint)
    }

    /// Apply one event from the reader task.
    ///
    /// Returns the control message that the owner must act on
    /// (`HandshakeOk` on entering `Streaming`, `Ack` while streaming),
    /// `None` for informational or stale events, or the error that
    /// faulted the link.
    pub async fn handle_inbound(
        &mut self,
        event: InboundEvent,
    ) -> Result<Option<InboundMessage>, RcError> {
        if event.generation != self.generation || !self.state.is_listening() {
            debug!(generation = event.generation, "dropping stale inbound event");
            return Ok(None);
        }

        let text = match event.kind {
            InboundKind::Failed(reason) => {
                let err = if self.state.is_streaming() {
                    RcError::TransportReceiveFailure(reason)
                } else {
                    RcError::HandshakeRejected(format!("link dropped before handshake: {reason}"))
                };
                warn!(%err, "link failed");
                self.drop_link();
                self.state.fault();
                return Err(err);
            }
            InboundKind::Frame(text) => text,
        };

        let awaiting = matches!(self.state, ConnectionState::AwaitingHandshake);
        match (awaiting, ProtocolCodec::decode(&text)) {
            (true, InboundMessage::HandshakeOk) => {
                self.state.begin_streaming()?;
                info!("handshake complete, streaming");
                Ok(Some(InboundMessage::HandshakeOk))
            }
            (true, _) => {
                warn!(reply = %text, "unexpected handshake reply");
                self.close_link(CloseCode::Policy, "unexpected handshake reply")
                    .await;
                self.state.fault();
                Err(RcError::HandshakeRejected(format!(
                    "unexpected handshake reply {text:?}"
                )))
            }
            (false, InboundMessage::Ack) => Ok(Some(InboundMessage::Ack)),
            (false, InboundMessage::HandshakeOk) => {
                debug!("repeated handshake token ignored");
                Ok(None)
            }
            (false, InboundMessage::Other(text)) => {
                info!(message = %text, "peer message");
                Ok(None)
            }
        }
    }

    /// Send one text frame. Only allowed while `Streaming`.
    ///
    /// A write failure faults the link.
    pub async fn send_text(&mut self, text: String) -> Result<(), RcError> {
        if !self.state.is_streaming() {
            return Err(RcError::NotConnected(self.state.name()));
        }
        if let Err(e) = self.write(text).await {
            warn!(%e, "send failed");
            self.drop_link();
            self.state.fault();
            return Err(e);
        }
        Ok(())
    }

    /// Close the link with a "going away" frame and return to
    /// `Disconnected`. The reader is stopped first, so nothing is
    /// dispatched after this returns.
    pub async fn disconnect(&mut self) -> Result<(), RcError> {
        if self.state.is_disconnected() {
            return Ok(());
        }
        self.state.finish_disconnect()?;
        self.close_link(CloseCode::Away, "client disconnect").await;
        info!("disconnected");
        Ok(())
    }

    /// Give up on a peer that never answered the probe.
    ///
    /// Returns `None` unless the link is still `AwaitingHandshake`.
    pub async fn abandon_handshake(&mut self, waited: Duration) -> Option<RcError> {
        if !matches!(self.state, ConnectionState::AwaitingHandshake) {
            return None;
        }
        warn!(?waited, "no handshake reply");
        self.close_link(CloseCode::Away, "handshake timeout").await;
        self.state.fault();
        Some(RcError::HandshakeRejected(format!(
            "no reply to the connection test within {waited:?}"
        )))
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn write(&mut self, text: String) -> Result<(), RcError> {
        let link = self
            .link
            .as_mut()
            .ok_or(RcError::NotConnected(self.state.name()))?;
        link.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| RcError::TransportSendFailure(e.to_string()))
    }

    /// Stop the reader and drop the socket without a close handshake.
    pub(crate) fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            link.reader.abort();
        }
    }

    /// Stop the reader, then send a close frame on a best-effort basis.
    async fn close_link(&mut self, code: CloseCode, reason: &'static str) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        link.reader.abort();
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let closing = async {
            link.sink.send(Message::Close(Some(frame))).await?;
            link.sink.close().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(%e, "close frame not delivered"),
            Err(_) => debug!("close timed out"),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.drop_link();
    }
}

#[async_trait]
impl TelemetryLink for ConnectionManager {
    fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    async fn send_text(&mut self, text: String) -> Result<(), RcError> {
        ConnectionManager::send_text(self, text).await
    }
}

// ── Reader task ──────────────────────────────────────────────────

/// Forward every text frame to the owner until the link fails.
///
/// A plain loop: one receive per iteration, no re-spawning.
async fn listen(
    mut stream: SplitStream<WsStream>,
    generation: u64,
    inbound: mpsc::Sender<InboundEvent>,
) {
    loop {
        let kind = match stream.next().await {
            Some(Ok(Message::Text(text))) => InboundKind::Frame(text),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => InboundKind::Frame(text),
                Err(_) => {
                    debug!("ignoring non-utf8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => InboundKind::Failed(match frame {
                Some(frame) => format!("peer closed the link (code {})", u16::from(frame.code)),
                None => "peer closed the link".to_string(),
            }),
            // Ping/pong are answered by the websocket layer.
            Some(Ok(_)) => continue,
            Some(Err(e)) => InboundKind::Failed(e.to_string()),
            None => InboundKind::Failed("link closed".to_string()),
        };

        let terminal = matches!(kind, InboundKind::Failed(_));
        if inbound.send(InboundEvent { generation, kind }).await.is_err() || terminal {
            break;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (ConnectionManager, mpsc::Receiver<InboundEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionManager::new(tx, Duration::from_millis(500)), rx)
    }

    #[tokio::test]
    async fn empty_address_fails_before_io() {
        let (mut conn, _rx) = manager();
        let err = conn.connect("", "8080").await.unwrap_err();
        assert!(matches!(err, RcError::InvalidEndpoint(_)));
        assert!(conn.state().is_faulted());
        assert_eq!(conn.generation(), 0);
    }

    #[tokio::test]
    async fn send_outside_streaming_is_rejected() {
        let (mut conn, _rx) = manager();
        let err = conn.send_text("Data: x".into()).await.unwrap_err();
        assert!(matches!(err, RcError::NotConnected("Disconnected")));
    }

    #[tokio::test]
    async fn refused_port_is_open_failure() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (mut conn, _rx) = manager();
        let err = conn
            .connect("127.0.0.1", &port.to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RcError::TransportOpenFailure(_)));
        assert!(conn.state().is_faulted());
    }

    #[tokio::test]
    async fn stale_events_are_ignored() {
        let (mut conn, _rx) = manager();
        let event = InboundEvent {
            generation: 7,
            kind: InboundKind::Failed("gone".into()),
        };
        assert!(conn.handle_inbound(event).await.unwrap().is_none());
        assert!(conn.state().is_disconnected());
    }

    #[tokio::test]
    async fn abandon_handshake_only_while_waiting() {
        let (mut conn, _rx) = manager();
        assert!(conn.abandon_handshake(Duration::from_millis(5)).await.is_none());
        assert!(conn.state().is_disconnected());
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let (mut conn, _rx) = manager();
        tokio_test::assert_ok!(conn.disconnect().await);
        assert!(conn.state().is_disconnected());
    }
}
