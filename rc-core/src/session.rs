//! The single owner of all observable state.
//!
//! Motion samples, operator input and inbound frames all arrive on
//! channels and are applied one at a time by [`Session::run`]. Nothing
//! else mutates the aggregator, the connection state or the delay
//! estimate, so readers never see a half-applied update. Observers get
//! a [`SessionStatus`] through a `watch` channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::aggregator::{Actuator, Channel, ChannelSet, DeltaAggregator, MotionSample, PrecisionMode, Snapshot};
use crate::codec::InboundMessage;
use crate::delay::DelayTracker;
use crate::error::RcError;
use crate::network::{ConnectionManager, InboundEvent};
use crate::scheduler::OutboundScheduler;
use crate::state::ConnectionState;

/// Status text shown after a successful handshake.
pub const CONNECTED_TEXT: &str = "Connected successfully!";

const COMMAND_QUEUE: usize = 256;
const INBOUND_QUEUE: usize = 64;

pub type ConnectReply = oneshot::Sender<Result<(), RcError>>;

// ── Options ──────────────────────────────────────────────────────

/// Start-up settings for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Upper bound on the WebSocket open.
    pub open_timeout: Duration,
    pub precision: PrecisionMode,
    /// Channels enabled at start.
    pub channels: ChannelSet,
    pub gripper: f64,
    pub height: f64,
    /// Whether samples are accepted from the start.
    pub sampling: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            open_timeout: Duration::from_millis(5000),
            precision: PrecisionMode::Standard,
            channels: ChannelSet::all(),
            gripper: 0.0,
            height: 0.0,
            sampling: false,
        }
    }
}

// ── Commands & status ────────────────────────────────────────────

/// Everything that can change session state.
#[derive(Debug)]
pub enum SessionCommand {
    /// Open a link. `reply` resolves once the handshake succeeds or
    /// fails.
    Connect {
        address: String,
        port: String,
        reply: Option<ConnectReply>,
    },
    Disconnect,
    Sample(MotionSample),
    /// Start or stop accepting samples.
    SetSampling(bool),
    SetChannel(Channel, bool),
    ToggleChannel(Channel),
    SetActuator(Actuator, f64),
    SetPrecision(PrecisionMode),
    TogglePrecision,
    /// Zero the accumulators, halt sampling, queue a zeroed line.
    Reset,
    Shutdown,
}

/// What the display layer sees.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub state: ConnectionState,
    /// Mirrors `state.is_streaming()`.
    pub connected: bool,
    /// Set by the last failure, cleared by the next success or
    /// disconnect.
    pub error: bool,
    /// Operator-facing status line.
    pub message: String,
    pub snapshot: Snapshot,
    pub channels: ChannelSet,
    pub sampling: bool,
    /// Latest round-trip estimate in milliseconds.
    pub delay_ms: u64,
    pub sent: u64,
    pub acked: u64,
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cheap, cloneable front door to a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), RcError> {
        self.commands.send(command).await?;
        Ok(())
    }

    /// Request a connect and wait for the handshake outcome.
    pub async fn connect(&self, address: &str, port: &str) -> Result<(), RcError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Connect {
            address: address.to_string(),
            port: port.to_string(),
            reply: Some(tx),
        })
        .await?;
        rx.await?
    }

    pub async fn disconnect(&self) -> Result<(), RcError> {
        self.send(SessionCommand::Disconnect).await
    }

    pub async fn sample(&self, sample: MotionSample) -> Result<(), RcError> {
        self.send(SessionCommand::Sample(sample)).await
    }

    pub async fn shutdown(&self) -> Result<(), RcError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// A receiver that wakes on every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait until `pred` holds for the published status.
    pub async fn wait_for<F>(&self, pred: F) -> Result<SessionStatus, RcError>
    where
        F: FnMut(&SessionStatus) -> bool,
    {
        let mut rx = self.status.clone();
        let status = rx.wait_for(pred).await.map_err(|_| RcError::ChannelClosed)?;
        Ok(status.clone())
    }
}

// ── Session ──────────────────────────────────────────────────────

pub struct Session {
    aggregator: DeltaAggregator,
    connection: ConnectionManager,
    scheduler: OutboundScheduler,
    delay: DelayTracker,
    sampling: bool,
    error: bool,
    message: String,
    pending_connect: Option<ConnectReply>,
    /// How long the peer gets to answer the probe.
    handshake_timeout: Duration,
    /// Armed while `AwaitingHandshake`.
    handshake_deadline: Option<Instant>,
    commands: mpsc::Receiver<SessionCommand>,
    inbound: mpsc::Receiver<InboundEvent>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Session {
    /// Build a session and its handle without starting it.
    pub fn new(options: SessionOptions) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let mut aggregator = DeltaAggregator::new();
        aggregator.set_precision(options.precision);
        for channel in Channel::ALL {
            aggregator.set_channel_enabled(channel, options.channels.contains(channel.flag()));
        }
        aggregator.set_actuator(Actuator::Gripper, options.gripper);
        aggregator.set_actuator(Actuator::Height, options.height);

        let session = Self {
            aggregator,
            connection: ConnectionManager::new(inbound_tx, options.open_timeout),
            scheduler: OutboundScheduler::new(),
            delay: DelayTracker::new(),
            sampling: options.sampling,
            error: false,
            message: String::new(),
            pending_connect: None,
            handshake_timeout: options.open_timeout,
            handshake_deadline: None,
            commands,
            inbound,
            status_tx,
        };
        session.publish();

        let handle = SessionHandle {
            commands: command_tx,
            status: status_rx,
        };
        (session, handle)
    }

    /// Build and spawn onto the current runtime.
    pub fn spawn(options: SessionOptions) -> (SessionHandle, JoinHandle<()>) {
        let (session, handle) = Self::new(options);
        (handle, tokio::spawn(session.run()))
    }

    /// Apply commands and inbound events until shutdown.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.inbound.recv() => self.handle_inbound(event).await,
                _ = expires(self.handshake_deadline) => self.handshake_expired().await,
            }
            if !matches!(self.connection.state(), ConnectionState::AwaitingHandshake) {
                self.handshake_deadline = None;
            }
            self.publish();
        }

        self.scheduler.clear();
        if let Err(e) = self.connection.disconnect().await {
            debug!(%e, "disconnect on shutdown");
        }
        self.resolve_connect(Err(RcError::ChannelClosed));
        self.publish();
        info!("session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect {
                address,
                port,
                reply,
            } => self.connect(&address, &port, reply).await,
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::Sample(sample) => {
                if !self.sampling {
                    return;
                }
                self.aggregator.apply_sample(sample);
                self.offer_current().await;
            }
            SessionCommand::SetSampling(on) => {
                if self.sampling != on {
                    info!(sampling = on, "sampling switched");
                }
                self.sampling = on;
                if !on {
                    self.aggregator.clear_baseline();
                }
            }
            SessionCommand::SetChannel(channel, enabled) => {
                self.aggregator.set_channel_enabled(channel, enabled);
            }
            SessionCommand::ToggleChannel(channel) => {
                let enabled = self.aggregator.toggle_channel(channel);
                debug!(%channel, enabled, "channel toggled");
            }
            SessionCommand::SetActuator(actuator, value) => {
                self.aggregator.set_actuator(actuator, value);
                self.offer_current().await;
            }
            SessionCommand::SetPrecision(precision) => {
                self.aggregator.set_precision(precision);
                self.offer_current().await;
            }
            SessionCommand::TogglePrecision => {
                let precision = self.aggregator.precision().toggled();
                self.aggregator.set_precision(precision);
                self.offer_current().await;
            }
            SessionCommand::Reset => {
                self.sampling = false;
                let zeroed = self.aggregator.reset();
                info!("telemetry zeroed");
                if self.connection.is_connected() {
                    self.scheduler.offer(zeroed);
                    self.pump().await;
                }
            }
            // Handled by the run loop.
            SessionCommand::Shutdown => {}
        }
    }

    async fn connect(&mut self, address: &str, port: &str, reply: Option<ConnectReply>) {
        if self.connection.state().is_listening() {
            let err = RcError::InvalidTransition("cannot connect: a connection is already active");
            if let Some(reply) = reply {
                let _ = reply.send(Err(err));
            }
            return;
        }

        // A newer request replaces an unanswered one.
        self.resolve_connect(Err(RcError::Other("superseded by a newer connect".into())));
        self.scheduler.restart();

        match self.connection.connect(address, port).await {
            Ok(endpoint) => {
                self.set_status(false, format!("Waiting for handshake from {endpoint}"));
                self.handshake_deadline = Some(Instant::now() + self.handshake_timeout);
                self.pending_connect = reply;
            }
            Err(e) => {
                warn!(%e, "connect failed");
                self.set_status(true, e.to_string());
                self.pending_connect = reply;
                self.resolve_connect(Err(e));
            }
        }
    }

    async fn disconnect(&mut self) {
        self.scheduler.clear();
        match self.connection.disconnect().await {
            Ok(()) => self.set_status(false, "Disconnected".to_string()),
            Err(e) => self.set_status(true, e.to_string()),
        }
        self.resolve_connect(Err(RcError::Other("disconnected before handshake".into())));
    }

    async fn handle_inbound(&mut self, event: InboundEvent) {
        match self.connection.handle_inbound(event).await {
            Ok(Some(InboundMessage::HandshakeOk)) => {
                self.delay.reset_baseline();
                self.scheduler.restart();
                self.set_status(false, CONNECTED_TEXT.to_string());
                self.scheduler.offer(self.aggregator.snapshot());
                let outcome = self.try_pump().await;
                self.resolve_connect(outcome);
            }
            Ok(Some(InboundMessage::Ack)) => {
                if self.scheduler.on_ack() {
                    if let Some(ms) = self.delay.on_ack() {
                        debug!(delay_ms = ms, "ack");
                    }
                }
                self.pump().await;
            }
            Ok(_) => {}
            Err(e) => {
                self.scheduler.clear();
                self.set_status(true, e.to_string());
                self.resolve_connect(Err(e));
            }
        }
    }

    /// Queue the current snapshot if streaming and try to send it.
    async fn offer_current(&mut self) {
        if !self.connection.is_connected() {
            return;
        }
        self.scheduler.offer(self.aggregator.snapshot());
        self.pump().await;
    }

    async fn pump(&mut self) {
        let _ = self.try_pump().await;
    }

    /// Like [`pump`](Self::pump), but hands back the send failure after
    /// recording it in the status.
    async fn try_pump(&mut self) -> Result<(), RcError> {
        if let Err(e) = self
            .scheduler
            .dispatch(&mut self.connection, &mut self.delay)
            .await
        {
            warn!(%e, "telemetry send failed");
            self.scheduler.clear();
            self.set_status(true, e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn handshake_expired(&mut self) {
        self.handshake_deadline = None;
        if let Some(e) = self
            .connection
            .abandon_handshake(self.handshake_timeout)
            .await
        {
            self.scheduler.clear();
            self.set_status(true, e.to_string());
            self.resolve_connect(Err(e));
        }
    }

    /// Answer a waiting connect. Status is published first so the
    /// caller sees the outcome as soon as the reply lands.
    fn resolve_connect(&mut self, result: Result<(), RcError>) {
        if let Some(reply) = self.pending_connect.take() {
            self.publish();
            let _ = reply.send(result);
        }
    }

    fn set_status(&mut self, error: bool, message: String) {
        self.error = error;
        self.message = message;
    }

    fn publish(&self) {
        let state = self.connection.state().clone();
        let status = SessionStatus {
            connected: state.is_streaming(),
            state,
            error: self.error,
            message: self.message.clone(),
            snapshot: self.aggregator.snapshot(),
            channels: self.aggregator.channels(),
            sampling: self.sampling,
            delay_ms: self.delay.delay_ms(),
            sent: self.scheduler.sent_count(),
            acked: self.scheduler.acked_count(),
        };
        self.status_tx.send_replace(status);
    }
}

/// Resolve at `deadline`, or never if unarmed.
async fn expires(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

// ── Tests ────────────────────────────────────────────────────────
