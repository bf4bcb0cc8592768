//! Operator console: one command per line on stdin.
//!
//! ```text
//! connect [addr] [port]     open a link (defaults from config)
//! disconnect
//! gripper <0..999>
//! height <-1..1>
//! toggle orie|pitch|roll
//! sensors on|off
//! precise                   flip 3/6 decimals
//! reset
//! status
//! quit
//! ```

use std::fmt::Write as _;

use rc_core::{Actuator, Channel, SessionCommand, SessionStatus};
use thiserror::Error;

use crate::config::NetworkConfig;

pub const HELP: &str = "commands: connect [addr] [port], disconnect, gripper <0..999>, \
height <-1..1>, toggle orie|pitch|roll, sensors on|off, precise, reset, status, quit";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown command {0:?}; try `help`")]
    Unknown(String),

    #[error("`{0}` needs a value")]
    MissingArgument(&'static str),

    #[error("not a number: {0:?}")]
    BadNumber(String),

    #[error("unknown channel {0:?}; expected orie, pitch or roll")]
    BadChannel(String),

    #[error("expected on or off, got {0:?}")]
    BadSwitch(String),

    #[error("too many arguments for `{0}`")]
    TooMany(&'static str),
}

/// A parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Connect {
        address: Option<String>,
        port: Option<String>,
    },
    Disconnect,
    Gripper(f64),
    Height(f64),
    Toggle(Channel),
    Sensors(bool),
    Precise,
    Reset,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match verb.to_ascii_lowercase().as_str() {
            "connect" => {
                if args.len() > 2 {
                    return Err(ParseError::TooMany("connect"));
                }
                ConsoleCommand::Connect {
                    address: args.first().map(|s| s.to_string()),
                    port: args.get(1).map(|s| s.to_string()),
                }
            }
            "disconnect" => no_args("disconnect", &args, ConsoleCommand::Disconnect)?,
            "gripper" => ConsoleCommand::Gripper(number("gripper", &args)?),
            "height" => ConsoleCommand::Height(number("height", &args)?),
            "toggle" => {
                let name = single("toggle", &args)?;
                ConsoleCommand::Toggle(channel(name)?)
            }
            "sensors" => {
                let switch = single("sensors", &args)?;
                match switch.to_ascii_lowercase().as_str() {
                    "on" => ConsoleCommand::Sensors(true),
                    "off" => ConsoleCommand::Sensors(false),
                    _ => return Err(ParseError::BadSwitch(switch.to_string())),
                }
            }
            "precise" => no_args("precise", &args, ConsoleCommand::Precise)?,
            "reset" => no_args("reset", &args, ConsoleCommand::Reset)?,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// The session command for this line, or `None` for console-local
    /// commands. Missing connect fields come from `defaults`.
    pub fn to_session(&self, defaults: &NetworkConfig) -> Option<SessionCommand> {
        let command = match self {
            ConsoleCommand::Connect { address, port } => SessionCommand::Connect {
                address: address.clone().unwrap_or_else(|| defaults.address.clone()),
                port: port.clone().unwrap_or_else(|| defaults.port.clone()),
                reply: None,
            },
            ConsoleCommand::Disconnect => SessionCommand::Disconnect,
            ConsoleCommand::Gripper(v) => SessionCommand::SetActuator(Actuator::Gripper, *v),
            ConsoleCommand::Height(v) => SessionCommand::SetActuator(Actuator::Height, *v),
            ConsoleCommand::Toggle(channel) => SessionCommand::ToggleChannel(*channel),
            ConsoleCommand::Sensors(on) => SessionCommand::SetSampling(*on),
            ConsoleCommand::Precise => SessionCommand::TogglePrecision,
            ConsoleCommand::Reset => SessionCommand::Reset,
            ConsoleCommand::Status | ConsoleCommand::Help | ConsoleCommand::Quit => return None,
        };
        Some(command)
    }
}

fn no_args(
    verb: &'static str,
    args: &[&str],
    command: ConsoleCommand,
) -> Result<ConsoleCommand, ParseError> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(ParseError::TooMany(verb))
    }
}

fn single<'a>(verb: &'static str, args: &[&'a str]) -> Result<&'a str, ParseError> {
    match args {
        [] => Err(ParseError::MissingArgument(verb)),
        [one] => Ok(one),
        _ => Err(ParseError::TooMany(verb)),
    }
}

fn number(verb: &'static str, args: &[&str]) -> Result<f64, ParseError> {
    let raw = single(verb, args)?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::BadNumber(raw.to_string())),
    }
}

fn channel(name: &str) -> Result<Channel, ParseError> {
    Channel::ALL
        .into_iter()
        .find(|c| c.to_string().eq_ignore_ascii_case(name))
        .ok_or_else(|| ParseError::BadChannel(name.to_string()))
}

// ── Status rendering ─────────────────────────────────────────────

/// Multi-line readout in the current precision.
pub fn render_status(status: &SessionStatus) -> String {
    let snap = &status.snapshot;
    let p = snap.precision.decimals();
    let d = &snap.delta;
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[{}] {}",
        status.state,
        if status.message.is_empty() { "-" } else { status.message.as_str() }
    );
    let _ = writeln!(
        out,
        "Orie: X {:.p$}, Y {:.p$}, Z {:.p$}",
        d.x, d.y, d.z
    );
    let _ = writeln!(out, "Pitch: {:.p$}", d.pitch);
    let _ = writeln!(out, "Roll: {:.p$}", d.roll);
    let _ = writeln!(out, "Gripper: {}", snap.actuators.gripper.trunc() as i64);
    let _ = writeln!(out, "Height: {:.p$}", snap.actuators.height);

    let channels: Vec<String> = Channel::ALL
        .into_iter()
        .map(|c| {
            let mark = if status.channels.contains(c.flag()) { '+' } else { '-' };
            format!("{mark}{c}")
        })
        .collect();
    let _ = write!(
        out,
        "Sensors: {}  Channels: {}  Delay: {} ms  Sent/Acked: {}/{}",
        if status.sampling { "on" } else { "off" },
        channels.join(" "),
        status.delay_ms,
        status.sent,
        status.acked
    );
    out
}

// ── Tests ────────────────────────────────────────────────────────
