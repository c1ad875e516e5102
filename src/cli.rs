//! Command line interface for the `echo-nats` binary.
//!
//! The binary connects to a broker, subscribes to the requested channels and
//! prints every event it receives as one JSON object per line.

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command line arguments for the `echo-nats` binary.
#[derive(Debug, Parser)]
#[command(
    name = "echo-nats",
    version,
    about = "Listen to broadcast channels over a NATS WebSocket"
)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Broker host, overriding the configuration file.
    #[arg(long)]
    pub host: Option<String>,

    /// Broker port, overriding the configuration file.
    #[arg(long)]
    pub port: Option<u16>,

    /// Public channel to listen on. May be repeated.
    #[arg(long = "channel", value_name = "NAME")]
    pub channels: Vec<String>,

    /// Private channel to listen on, without the `private-` prefix. May be
    /// repeated.
    #[arg(long = "private", value_name = "NAME")]
    pub private: Vec<String>,

    /// Presence channel to join, without the `presence-` prefix. May be
    /// repeated.
    #[arg(long = "presence", value_name = "NAME")]
    pub presence: Vec<String>,

    /// Enable debug logging and span timing.
    #[arg(short, long)]
    pub debug: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_repeated_channels() {
        let cli = Cli::parse_from([
            "echo-nats",
            "--config",
            "echo.toml",
            "--channel",
            "orders",
            "--channel",
            "news",
            "--private",
            "App.Models.User.1",
            "--debug",
        ]);
        assert_eq!(cli.config.as_deref(), Some("echo.toml".as_ref()));
        assert_eq!(cli.channels, ["orders", "news"]);
        assert_eq!(cli.private, ["App.Models.User.1"]);
        assert!(cli.presence.is_empty());
        assert!(cli.debug);
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn parses_metrics_address() {
        let cli = Cli::parse_from(["echo-nats", "--metrics-addr", "127.0.0.1:9000"]);
        assert_eq!(
            cli.metrics_addr.map(|addr| addr.port()),
            Some(9000)
        );
    }
}
