//! Reference controller endpoint.
//!
//! Answers the probe, acknowledges every telemetry line and sends a
//! periodic `"ping"` text frame. Used by the `rc-peer` binary and by the
//! integration tests; the handshake reply and ack latency can be changed
//! to emulate a wrong or slow peer.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::codec::{ACK, DATA_PREFIX, HANDSHAKE_OK, PROBE, ProtocolCodec, TelemetryFrame};
use crate::error::RcError;

/// Heartbeat text sent to idle clients.
pub const HEARTBEAT: &str = "ping";

/// How the peer behaves towards each client.
#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Reply to `"Test Connection"`.
    pub handshake_reply: String,
    /// Pause before each ack.
    pub ack_delay: Duration,
    /// Heartbeat period; `None` disables it.
    pub heartbeat: Option<Duration>,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            handshake_reply: HANDSHAKE_OK.to_string(),
            ack_delay: Duration::ZERO,
            heartbeat: Some(Duration::from_secs(10)),
        }
    }
}

/// What the peer observed, in arrival order per client.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    ClientConnected(SocketAddr),
    Probe(SocketAddr),
    Telemetry(SocketAddr, TelemetryFrame),
    /// A `Data:` line that did not parse. Still acknowledged.
    Malformed(SocketAddr, String),
    Unknown(SocketAddr, String),
    ClientClosed(SocketAddr),
}

pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

// ── PeerServer ───────────────────────────────────────────────────

pub struct PeerServer {
    listener: TcpListener,
    options: PeerOptions,
}

impl PeerServer {
    pub async fn bind(addr: &str, options: PeerOptions) -> Result<Self, RcError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, options })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RcError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever, one task per client.
    pub async fn run(self, events: PeerEventSender) -> Result<(), RcError> {
        info!(addr = %self.listener.local_addr()?, "peer listening");
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let options = self.options.clone();
            let events = events.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_client(stream, addr, options, &events).await {
                    warn!(%addr, %e, "client session ended with error");
                }
                let _ = events.send(PeerEvent::ClientClosed(addr));
            });
        }
    }

    pub fn spawn(self, events: PeerEventSender) -> JoinHandle<Result<(), RcError>> {
        tokio::spawn(self.run(events))
    }
}

async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    options: PeerOptions,
    events: &PeerEventSender,
) -> Result<(), RcError> {
    let ws = accept_async(stream).await?;
    info!(%addr, "client connected");
    let _ = events.send(PeerEvent::ClientConnected(addr));

    let (mut sink, mut source) = ws.split();
    let mut heartbeat = options
        .heartbeat
        .map(|period| tokio::time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            message = source.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(%addr, %e, "client dropped");
                        break;
                    }
                };

                if text == PROBE {
                    debug!(%addr, "connection test received");
                    let _ = events.send(PeerEvent::Probe(addr));
                    sink.send(Message::Text(options.handshake_reply.clone())).await?;
                } else if text.starts_with(DATA_PREFIX) {
                    match ProtocolCodec::parse_telemetry(&text) {
                        Ok(frame) => {
                            debug!(%addr, ?frame, "telemetry");
                            let _ = events.send(PeerEvent::Telemetry(addr, frame));
                        }
                        Err(e) => {
                            warn!(%addr, %e, "bad telemetry line");
                            let _ = events.send(PeerEvent::Malformed(addr, text));
                        }
                    }
                    if !options.ack_delay.is_zero() {
                        tokio::time::sleep(options.ack_delay).await;
                    }
                    sink.send(Message::Text(ACK.to_string())).await?;
                } else {
                    info!(%addr, message = %text, "unknown message");
                    let _ = events.send(PeerEvent::Unknown(addr, text));
                }
            }
            _ = next_tick(&mut heartbeat) => {
                sink.send(Message::Text(HEARTBEAT.to_string())).await?;
                debug!(%addr, "heartbeat sent");
            }
        }
    }

    info!(%addr, "client disconnected");
    Ok(())
}

/// Resolve on the next heartbeat tick, or never if disabled.
async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
