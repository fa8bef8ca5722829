use std::time::Duration;

use clap::{Args, Subcommand};
use crier_node::{Node, NodeOptions, DEFAULT_ADDRESS, DEFAULT_PORT};

use crate::exit::{CliError, CliResult, USAGE};

pub mod check;
pub mod listen;
pub mod send;
pub mod serve;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a single event.
    Send(SendArgs),
    /// Subscribe to a topic and print received payloads.
    Listen(ListenArgs),
    /// Probe for a live broadcaster.
    Check(CheckArgs),
    /// Run a dedicated broadcaster until interrupted.
    Serve(ServeArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args),
        Command::Listen(args) => listen::run(args),
        Command::Check(args) => check::run(args),
        Command::Serve(args) => serve::run(args),
    }
}

#[derive(Args, Debug)]
pub struct NetArgs {
    /// Bind/connect address.
    #[arg(long, default_value = DEFAULT_ADDRESS)]
    pub address: String,
    /// Control channel port; the fan-out channel uses port + 1.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Topic to send on.
    pub topic: String,
    /// JSON object payload.
    #[arg(long)]
    pub json: Option<String>,
    /// Node id carried as the payload sender.
    #[arg(long)]
    pub id: Option<String>,
    /// Never become the broadcaster, even if none is running.
    #[arg(long)]
    pub no_server: bool,
    #[command(flatten)]
    pub net: NetArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Topic to subscribe to.
    pub topic: String,
    /// Only print events from this sender.
    #[arg(long)]
    pub sender: Option<String>,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Node id carried in outbound announcements.
    #[arg(long)]
    pub id: Option<String>,
    /// Never become the broadcaster, even if none is running.
    #[arg(long)]
    pub no_server: bool,
    #[command(flatten)]
    pub net: NetArgs,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Probe round-trip budget (e.g. 500ms, 2s).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
    #[command(flatten)]
    pub net: NetArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub net: NetArgs,
}

pub(crate) fn build_node(net: &NetArgs, id: Option<&str>, server: bool) -> Node {
    let node = Node::new();
    let mut options = NodeOptions::new()
        .address(net.address.clone())
        .port(net.port)
        .server(server);
    if let Some(id) = id {
        options = options.id(id);
    }
    node.configure(options);
    node
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }
}
