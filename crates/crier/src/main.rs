mod cmd;
mod exit;
mod logging;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "crier", version, about = "Broker-less local event exchange CLI")]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    match cmd::run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "crier",
            "send",
            "build.done",
            "--json",
            "{\"ok\":true}",
            "--port",
            "53000",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn parses_listen_subcommand() {
        let cli = Cli::try_parse_from(["crier", "listen", "build.done", "--count", "3"])
            .expect("listen args should parse");
        assert!(matches!(cli.command, Command::Listen(_)));
    }

    #[test]
    fn parses_check_subcommand() {
        let cli = Cli::try_parse_from(["crier", "check", "--timeout", "250ms"])
            .expect("check args should parse");
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["crier", "shout"]).is_err());
    }
}
