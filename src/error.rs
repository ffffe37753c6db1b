//! Error types and exit codes for file-watcher

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for file-watcher operations
#[derive(Error, Debug)]
pub enum FileWatcherError {
    #[error("Folder not found: {path}")]
    FolderNotFound { path: String },

    #[error("'{path}' is not a folder")]
    NotAFolder { path: String },

    #[error("File notification error: {0}")]
    Notify(#[from] notify::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Folder monitor is closed")]
    MonitorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileWatcherError {
    /// Convert error to an exit code:
    /// - 1: IO error
    /// - 2: Invalid folder (setup error)
    /// - 3: Notification backend failure
    /// - 4: Network / wire failure
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::FolderNotFound { .. } => ExitCode::from(2),
            Self::NotAFolder { .. } => ExitCode::from(2),
            Self::Notify(_) => ExitCode::from(3),
            Self::WebSocket(_) => ExitCode::from(4),
            Self::Json(_) => ExitCode::from(4),
            Self::ChannelClosed => ExitCode::from(4),
            Self::MonitorClosed => ExitCode::from(3),
            Self::Io(_) => ExitCode::from(1),
        }
    }
}

/// Result type alias for file-watcher operations
pub type Result<T> = std::result::Result<T, FileWatcherError>;
