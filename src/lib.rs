//! file-watcher: propagate folder listings from watchers to a central master
//!
//! A watcher observes one or more folders, coalesces bursts of change
//! notifications into settled snapshots, and pushes each snapshot to the
//! master over a self-healing WebSocket channel. The master keeps the latest
//! snapshot per watcher session and serves the merged, de-duplicated file
//! list over HTTP.
//!
//! # Example
//!
//! ```ignore
//! use file_watcher::{ChannelConfig, MonitorConfig, WatcherAgent};
//!
//! let agent = WatcherAgent::new(
//!     &["/srv/inbox".into()],
//!     MonitorConfig::default(),
//!     ChannelConfig::for_address("localhost:8080", file_watcher::master::WATCHER_PATH),
//! )?;
//! agent.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

pub mod agent;
pub mod channel;
pub mod cli;
pub mod debounce;
pub mod error;
pub mod fswatch;
pub mod master;
pub mod protocol;
pub mod registry;

// Re-export commonly used types
pub use agent::WatcherAgent;
pub use channel::{ChannelConfig, ChannelState, ChannelStats, ResilientChannel};
pub use debounce::Debouncer;
pub use error::{FileWatcherError, Result};
pub use fswatch::{FolderMonitor, MonitorConfig, SettledEvent, WatchedFolder};
pub use protocol::{Envelope, FilesResponse, Snapshot};
pub use registry::{SessionId, SessionRegistry};
