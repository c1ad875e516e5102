//! `echo-nats` binary: listen to broadcast channels and print their events.
//!
//! Each received event is printed as a JSON object with `channel`, `event`
//! and `data` fields. Connection lifecycle events are logged.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use echo_nats::{
    Connector,
    channel::{Channel, PresenceAware},
    config::ConnectorConfig,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "echo-nats failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: cli::Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => ConnectorConfig::load(path)?,
        None => ConnectorConfig::default(),
    };
    if let Some(host) = cli.host {
        config = config.with_host(host);
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if cli.debug {
        config = config.with_debug(true);
    }

    if let Some(addr) = cli.metrics_addr {
        install_metrics(addr)?;
    }

    let connector = Connector::new(config)?;
    for event in ["connected", "disconnect", "reconnecting", "error"] {
        connector.on(event, move |data| tracing::info!(%data, "{event}"));
    }

    for name in &cli.channels {
        print_events(&connector.channel(name));
    }
    for name in &cli.private {
        print_events(&connector.private_channel(name));
    }
    for name in &cli.presence {
        let room = connector.join(name);
        let channel = room.name().to_owned();
        room.here(move |members| print_line(&channel, "presence:here", members));
        print_events(&room);
    }

    if let Err(err) = connector.connect().await {
        if !err.is_transient() {
            return Err(err.into());
        }
        tracing::warn!(error = %err, "initial connection failed; retrying in background");
    }

    tokio::signal::ctrl_c().await?;
    connector.disconnect().await;
    Ok(())
}

fn print_events(channel: &Channel) {
    let name = channel.name().to_owned();
    channel.listen_to_all(move |event, data| print_line(&name, event, data));
}

fn print_line(channel: &str, event: &str, data: &serde_json::Value) {
    println!(
        "{}",
        json!({ "channel": channel, "event": event, "data": data })
    );
}

#[cfg(feature = "metrics")]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "serving metrics");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
#[expect(
    clippy::unnecessary_wraps,
    reason = "signature matches the metrics-enabled build"
)]
fn install_metrics(addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    tracing::warn!(%addr, "built without the `metrics` feature; not serving metrics");
    Ok(())
}
