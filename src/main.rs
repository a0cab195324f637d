//! Chainwatch service binary
//!
//! Wires the ingestion pipeline (websocket subscriber, listener, notifier)
//! to the HTTP facade and supervises a graceful shutdown: cancelling the
//! subscriber closes its channel, which drains the listener, which drains
//! the notifier.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chainwatch::rpc::RpcClient;
use chainwatch::server::{self, AppState};
use chainwatch::store::Store;
use chainwatch::{config, listener, notifier, subscriber};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

/// Capacity of the pipeline channels.
const CHANNEL_CAPACITY: usize = 1024;

/// Ethereum incoming-transfer notification service
#[derive(Parser)]
#[command(name = "chainwatch")]
#[command(about = "Watch Ethereum for transfers into managed addresses")]
struct Args {
    /// Create the database schema and exit
    #[arg(long)]
    init: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Configuration file
    #[arg(long, default_value = "config.ini")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let config = config::load(&args.config).context("Failed to load configuration")?;
    let store = Store::open(&config).await.context("Failed to open database")?;

    if args.init {
        store
            .init_tables()
            .await
            .context("Failed to create schema")?;
        info!("Schema created in database.");
        return Ok(());
    }

    let last_block = store.last_block().await;

    let (ws_tx, ws_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (notify_tx, notify_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let notifier_task = tokio::spawn(notifier::run(store.clone(), notify_rx));
    let listener_task = tokio::spawn(
        listener::Listener::new(RpcClient::new(config.rpc_url()), last_block)
            .run(ws_rx, notify_tx),
    );
    let subscriber_task = tokio::spawn(subscriber::run(
        config.websocket_url(),
        ws_tx,
        cancel.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        store,
    };
    let tcp = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .context("Failed to bind :8080")?;

    info!("Starting webserver...");
    let shutdown = cancel.clone();
    let router = server::router(state);
    let serve = async move {
        axum::serve(tcp, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    };

    tokio::select! {
        result = serve => {
            result.context("Webserver error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    // Stop the subscriber; the pipeline drains stage by stage behind it.
    cancel.cancel();
    let _ = subscriber_task.await;
    let _ = listener_task.await;
    let _ = notifier_task.await;

    info!("Shutdown complete");
    Ok(())
}
