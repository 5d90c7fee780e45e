use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wagate::protocol::ClientEvent;
use wagate::{Config, Subscription, create_client};

#[derive(Parser)]
#[command(name = "wagate", version, about = "Run a messaging connector and log its events")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "wagate.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let connector = config.whatsapp.with_env_overrides();

    let client = create_client(&connector).context("configuring connector")?;
    let events = tokio::spawn(log_events(client.subscribe()));

    client.start().await.context("starting connector")?;
    info!(transport = %client.transport(), "Connector started, press Ctrl+C to stop");

    shutdown_signal().await;
    info!("Shutting down");
    client.stop().await?;
    drop(client);
    events.abort();
    Ok(())
}

async fn log_events(mut events: Subscription) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::Pairing(_) => info!("Pairing code ready"),
            ClientEvent::Connection(status) => info!(%status, "Connection status changed"),
            ClientEvent::Ready => info!("Connector ready"),
            ClientEvent::Message(msg) => info!(
                id = %msg.id,
                from = %msg.from,
                kind = ?msg.message_type,
                content = %msg.content,
                "Message received"
            ),
            ClientEvent::Error(e) if e.is_terminal() => error!(kind = ?e.kind, "{e}"),
            ClientEvent::Error(e) => warn!(kind = ?e.kind, "{e}"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
