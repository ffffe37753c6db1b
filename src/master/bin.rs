//! file-watcher master binary
//!
//! Accepts watcher sessions over WebSocket and serves the merged file list.
//!
//! # Usage
//!
//! ```bash
//! file-watcher-master
//! file-watcher-master --watcher-addr 0.0.0.0:8080 --public-addr 0.0.0.0:8090
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use file_watcher::cli::MasterArgs;
use file_watcher::master::{serve_queries, serve_watchers, WATCHER_PATH};
use file_watcher::SessionRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_watcher=info,file_watcher_master=info,tower_http=info".into()),
        )
        .init();

    let args = MasterArgs::parse();
    let registry = Arc::new(SessionRegistry::new());

    let watcher_listener = TcpListener::bind(&args.watcher_addr)
        .await
        .with_context(|| format!("Failed to bind watcher listener on {}", args.watcher_addr))?;
    let public_listener = TcpListener::bind(&args.public_addr)
        .await
        .with_context(|| format!("Failed to bind query listener on {}", args.public_addr))?;

    tracing::info!(
        "Accepting watchers on ws://{}{}",
        watcher_listener.local_addr()?,
        WATCHER_PATH
    );
    tracing::info!("Serving queries on http://{}/files", public_listener.local_addr()?);

    tokio::select! {
        _ = serve_watchers(watcher_listener, Arc::clone(&registry)) => {}
        result = serve_queries(public_listener, Arc::clone(&registry)) => {
            result.context("Query server failed")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Unable to listen for shutdown signal")?;
            tracing::info!("Shutting down");
        }
    }

    Ok(())
}
