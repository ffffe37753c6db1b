//! Bridges raw file notifications to per-folder debouncers
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │   notify    │────>│ monitor loop │────>│  debouncer  │────>│ SettledEvent │
//! │   watcher   │     │ (pause gate) │     │ per folder  │     │  + Snapshot  │
//! └─────────────┘     └──────────────┘     └─────────────┘     └──────────────┘
//! ```
//!
//! Only create, remove and rename notifications matter: they are the only
//! ones that change a folder's listing. Content and metadata changes are
//! dropped before they reach a debouncer.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::debounce::Debouncer;
use crate::error::{FileWatcherError, Result};
use crate::protocol::Snapshot;

use super::folder::{current_files, WatchedFolder};

/// Configuration for the folder monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Debounce tick per folder (default: 200ms)
    pub debounce_duration: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(200),
        }
    }
}

/// A folder's listing has settled after a burst of changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledEvent {
    /// Canonical path of the folder
    pub folder: PathBuf,
    pub snapshot: Snapshot,
}

/// Input to the monitor loop
#[derive(Debug)]
enum MonitorInput {
    Notification(notify::Result<Event>),
    SetActive(bool),
    Shutdown,
}

/// Whether a notification can change a folder's file listing
pub fn is_listing_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    )
}

/// Watched folders keyed by canonical path
#[derive(Debug, Default)]
pub struct FolderTable {
    folders: RwLock<HashMap<PathBuf, Arc<WatchedFolder>>>,
}

impl FolderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, folder: Arc<WatchedFolder>) {
        self.folders
            .write()
            .insert(folder.path().to_path_buf(), folder);
    }

    pub fn folders(&self) -> Vec<Arc<WatchedFolder>> {
        self.folders.read().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.folders.read().len()
    }

    /// Signal the debouncer of every folder the event touches.
    ///
    /// Returns how many debouncers were signalled.
    pub fn route(&self, event: &Event) -> usize {
        if !is_listing_change(&event.kind) {
            return 0;
        }

        let folders = self.folders.read();
        let mut signalled = 0;

        for path in &event.paths {
            let Some(parent) = path.parent() else {
                continue;
            };

            match folders.get(parent) {
                Some(folder) => {
                    folder.touch();
                    signalled += 1;
                }
                None => {
                    // Can happen for the source side of a rename, or while a
                    // folder is still being registered
                    tracing::debug!(
                        "Received event for parent folder that isn't being watched ({})",
                        parent.display()
                    );
                }
            }
        }

        signalled
    }
}

/// Watches folders and emits a [`SettledEvent`] whenever one settles
pub struct FolderMonitor {
    config: MonitorConfig,
    folders: Arc<FolderTable>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    input: mpsc::UnboundedSender<MonitorInput>,
    settled_tx: mpsc::UnboundedSender<SettledEvent>,
}

impl FolderMonitor {
    /// Create a paused monitor and the stream of settled events.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: MonitorConfig) -> Result<(Self, mpsc::UnboundedReceiver<SettledEvent>)> {
        let (input, input_rx) = mpsc::unbounded_channel();
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();

        let notification_tx = input.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = notification_tx.send(MonitorInput::Notification(res));
        })?;

        let folders = Arc::new(FolderTable::new());
        tokio::spawn(monitor_loop(input_rx, Arc::clone(&folders)));

        let monitor = Self {
            config,
            folders,
            watcher: Mutex::new(Some(watcher)),
            input,
            settled_tx,
        };

        Ok((monitor, settled_rx))
    }

    /// Register a folder and start watching it.
    pub fn add_folder(&self, path: impl AsRef<Path>) -> Result<Arc<WatchedFolder>> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let metadata = fs::metadata(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FileWatcherError::FolderNotFound { path: name.clone() },
            _ => FileWatcherError::Io(e),
        })?;
        if !metadata.is_dir() {
            return Err(FileWatcherError::NotAFolder { path: name });
        }

        // Notifications carry paths under the watched path, so watch the
        // canonical form and key the table by it
        let canonical = fs::canonicalize(path)?;

        let debouncer = settle_debouncer(
            self.config.debounce_duration,
            name.clone(),
            canonical.clone(),
            self.settled_tx.clone(),
        );
        let folder = Arc::new(WatchedFolder::new(name, canonical.clone(), debouncer));
        self.folders.insert(Arc::clone(&folder));

        let mut guard = self.watcher.lock();
        let watcher = guard.as_mut().ok_or(FileWatcherError::MonitorClosed)?;
        watcher.watch(&canonical, RecursiveMode::NonRecursive)?;

        tracing::info!(
            "Watching '{}' ({} folders registered)",
            folder.name(),
            self.folders.len()
        );
        Ok(folder)
    }

    /// Registered folders
    pub fn folders(&self) -> Vec<Arc<WatchedFolder>> {
        self.folders.folders()
    }

    /// Resume feeding notifications to the debouncers
    pub fn start(&self) {
        let _ = self.input.send(MonitorInput::SetActive(true));
    }

    /// Discard notifications until the next `start`. Nothing is replayed.
    pub fn stop(&self) {
        let _ = self.input.send(MonitorInput::SetActive(false));
    }

    /// Stop watching and end the monitor loop. Idempotent.
    pub fn close(&self) {
        if self.watcher.lock().take().is_some() {
            let _ = self.input.send(MonitorInput::Shutdown);
            tracing::info!("Folder monitor closed");
        }
    }

    #[cfg(test)]
    fn inject(&self, event: Event) {
        let _ = self.input.send(MonitorInput::Notification(Ok(event)));
    }
}

impl std::fmt::Debug for FolderMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderMonitor")
            .field("config", &self.config)
            .field("folders", &self.folders.len())
            .finish()
    }
}

/// Debouncer that snapshots `path` and emits a settled event when it fires
fn settle_debouncer(
    duration: Duration,
    name: String,
    path: PathBuf,
    settled_tx: mpsc::UnboundedSender<SettledEvent>,
) -> Debouncer<()> {
    Debouncer::new(duration, move |_: ()| {
        let files = match current_files(&path) {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Could not get the current files of '{}' ({})", name, e);
                return;
            }
        };

        let event = SettledEvent {
            folder: path.clone(),
            snapshot: Snapshot::new(name.clone(), files),
        };
        if settled_tx.send(event).is_err() {
            tracing::debug!("Settled event receiver dropped for '{}'", name);
        }
    })
}

async fn monitor_loop(mut input: mpsc::UnboundedReceiver<MonitorInput>, folders: Arc<FolderTable>) {
    let mut active = false;

    while let Some(input) = input.recv().await {
        match input {
            MonitorInput::SetActive(state) => {
                if state != active {
                    tracing::debug!("Folder monitor {}", if state { "resumed" } else { "paused" });
                }
                active = state;
            }
            MonitorInput::Notification(Ok(event)) => {
                if active {
                    folders.route(&event);
                }
            }
            MonitorInput::Notification(Err(e)) => {
                tracing::warn!("Received error from file notifications ({})", e);
            }
            MonitorInput::Shutdown => break,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
