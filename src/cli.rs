//! Command-line arguments for the watcher and master binaries

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::channel::ChannelConfig;
use crate::fswatch::MonitorConfig;
use crate::master::WATCHER_PATH;

/// Watch folders and report their contents to a master
#[derive(Parser, Debug, Clone)]
#[command(name = "file-watcher")]
#[command(about = "Watch folders and push their file listings to a master")]
#[command(version)]
pub struct WatcherArgs {
    /// Master address (host:port) of the watcher endpoint
    #[arg(long, env = "FILE_WATCHER_ADDR", default_value = "localhost:8080")]
    pub addr: String,

    /// Folder to watch (repeatable)
    #[arg(
        long = "folder",
        env = "FILE_WATCHER_FOLDER",
        required = true,
        value_delimiter = ','
    )]
    pub folders: Vec<PathBuf>,

    /// Debounce tick in milliseconds
    #[arg(long, default_value = "200")]
    pub debounce_ms: u64,

    /// Keepalive / reconnect period in seconds
    #[arg(long, default_value = "2")]
    pub keepalive_secs: u64,
}

impl WatcherArgs {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            debounce_duration: Duration::from_millis(self.debounce_ms.max(1)),
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        let mut config = ChannelConfig::for_address(&self.addr, WATCHER_PATH);
        config.keepalive_interval = Duration::from_secs(self.keepalive_secs.max(1));
        config
    }
}

/// Aggregate watcher reports and serve the merged file list
#[derive(Parser, Debug, Clone)]
#[command(name = "file-watcher-master")]
#[command(about = "Collect folder listings from watchers and serve the merged view")]
#[command(version)]
pub struct MasterArgs {
    /// Address to accept watcher connections on
    #[arg(long, env = "FILE_WATCHER_WATCHER_ADDR", default_value = "localhost:8080")]
    pub watcher_addr: String,

    /// Address to serve the query API on
    #[arg(long, env = "FILE_WATCHER_PUBLIC_ADDR", default_value = "localhost:8090")]
    pub public_addr: String,
}
