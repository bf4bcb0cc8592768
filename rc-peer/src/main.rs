//! RC Remote reference peer — entry point.
//!
//! ```text
//! rc-peer                          Listen on 0.0.0.0:1145
//! rc-peer --bind 127.0.0.1:9000    Custom bind address
//! rc-peer --json                   One JSON object per telemetry line on stdout
//! rc-peer --ack-delay-ms 40        Emulate a slow controller
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rc_core::codec::HANDSHAKE_OK;
use rc_core::{PeerEvent, PeerOptions, PeerServer, TelemetryFrame};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rc-peer", about = "RC Remote reference controller endpoint")]
struct Cli {
    /// Address to listen on.
    #[arg(short, long, default_value = "0.0.0.0:1145")]
    bind: String,

    /// Seconds between heartbeats; 0 disables them.
    #[arg(long, default_value_t = 10)]
    heartbeat_secs: u64,

    /// Pause before acknowledging each telemetry line.
    #[arg(long, default_value_t = 0)]
    ack_delay_ms: u64,

    /// Reply to the connection test.
    #[arg(long, default_value = HANDSHAKE_OK)]
    handshake_reply: String,

    /// Print telemetry as JSON lines.
    #[arg(long)]
    json: bool,

    /// Log filter directive.
    #[arg(long, default_value = "info")]
    log: String,
}

impl Cli {
    fn peer_options(&self) -> PeerOptions {
        PeerOptions {
            handshake_reply: self.handshake_reply.clone(),
            ack_delay: Duration::from_millis(self.ack_delay_ms),
            heartbeat: (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs)),
        }
    }
}

/// A telemetry line tagged with its sender.
#[derive(Serialize)]
struct TelemetryRecord {
    client: SocketAddr,
    #[serde(flatten)]
    frame: TelemetryFrame,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("rc-peer v{}", env!("CARGO_PKG_VERSION"));

    let server = PeerServer::bind(&cli.bind, cli.peer_options()).await?;
    info!("listening on {}", server.local_addr()?);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let server_task = server.spawn(tx);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => report(&event, cli.json)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    server_task.abort();
    match server_task.await {
        Ok(Err(e)) => error!("peer stopped: {e}"),
        _ => info!("peer stopped"),
    }
    Ok(())
}

fn report(event: &PeerEvent, json: bool) -> Result<(), serde_json::Error> {
    match event {
        PeerEvent::Telemetry(client, frame) if json => {
            let record = TelemetryRecord {
                client: *client,
                frame: *frame,
            };
            println!("{}", serde_json::to_string(&record)?);
        }
        PeerEvent::Telemetry(client, f) => println!(
            "{client}  X {:+.6} Y {:+.6} Z {:+.6}  pitch {:+.6} roll {:+.6}  gripper {:3}  height {:+.6}",
            f.orie_x, f.orie_y, f.orie_z, f.pitch, f.roll, f.gripper, f.height
        ),
        PeerEvent::Malformed(client, line) => eprintln!("{client}  malformed: {line}"),
        PeerEvent::ClientConnected(client) => info!(%client, "client connected"),
        PeerEvent::ClientClosed(client) => info!(%client, "client closed"),
        PeerEvent::Probe(_) | PeerEvent::Unknown(..) => {}
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_heartbeat_disables_it() {
        let cli = Cli::parse_from(["rc-peer", "--heartbeat-secs", "0", "--ack-delay-ms", "40"]);
        let options = cli.peer_options();
        assert_eq!(options.heartbeat, None);
        assert_eq!(options.ack_delay, Duration::from_millis(40));
        assert_eq!(options.handshake_reply, HANDSHAKE_OK);
    }

    #[test]
    fn record_is_flat_json() {
        let record = TelemetryRecord {
            client: "127.0.0.1:5000".parse().unwrap(),
            frame: TelemetryFrame {
                gripper: 640,
                ..Default::default()
            },
        };
        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["client"], "127.0.0.1:5000");
        assert_eq!(value["Gripper"], 640);
        assert_eq!(value["OrieX"], 0.0);
    }
}
