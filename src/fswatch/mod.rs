//! Folder watching
//!
//! Uses the `notify` crate for raw change notifications and a per-folder
//! [`Debouncer`](crate::debounce::Debouncer) to turn bursts of changes into
//! one snapshot.
//!
//! - `folder` - A watched folder and its snapshot
//! - `monitor` - Notification routing, pause/resume, settled events

pub mod folder;
pub mod monitor;

pub use folder::{current_files, WatchedFolder};
pub use monitor::{is_listing_change, FolderMonitor, FolderTable, MonitorConfig, SettledEvent};
