//! file-watcher entry point
//!
//! ```bash
//! file-watcher --addr localhost:8080 --folder /srv/inbox
//! file-watcher --folder /srv/a --folder /srv/b --debounce-ms 500
//! ```

use std::process::ExitCode;

use clap::Parser;

use file_watcher::cli::WatcherArgs;
use file_watcher::WatcherAgent;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "file_watcher=info".into()),
        )
        .init();

    match run(WatcherArgs::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            e.exit_code()
        }
    }
}

async fn run(args: WatcherArgs) -> file_watcher::Result<()> {
    let agent = WatcherAgent::new(&args.folders, args.monitor_config(), args.channel_config())?;
    tracing::info!("Reporting to {}", agent.channel().url());

    agent
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Unable to listen for shutdown signal ({})", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await
}
