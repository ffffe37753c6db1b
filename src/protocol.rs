//! Wire message types
//!
//! Watchers talk to the master with JSON envelopes over WebSocket:
//!
//! ```json
//! {"type": "FolderContents", "payload": {"name": "/srv/in", "files": ["a.txt", "b.txt"]}}
//! ```
//!
//! The public query endpoint answers with:
//!
//! ```json
//! {"files": [{"filename": "a.txt"}, {"filename": "b.txt"}]}
//! ```

use serde::{Deserialize, Deserializer, Serialize};

/// Envelope `type` for folder snapshots
pub const FOLDER_CONTENTS: &str = "FolderContents";

/// The regular-file names of one folder at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Folder name as configured on the watcher
    pub name: String,
    /// File names in enumeration order (not sorted)
    pub files: Vec<String>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }
}

/// Watcher <-> master message
///
/// Decoding dispatches once on `type`. Kinds this build does not know about
/// decode to [`Envelope::Unknown`] so the receiver can log and skip them
/// instead of dropping the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Envelope {
    /// Full snapshot of a watched folder
    FolderContents(Snapshot),
    /// A message kind this build does not understand
    #[serde(skip_serializing)]
    Unknown { kind: String },
}

impl Envelope {
    /// Name of the message kind, as carried in `type`
    pub fn kind(&self) -> &str {
        match self {
            Self::FolderContents(_) => FOLDER_CONTENTS,
            Self::Unknown { kind } => kind,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl From<Snapshot> for Envelope {
    fn from(snapshot: Snapshot) -> Self {
        Self::FolderContents(snapshot)
    }
}

/// Envelope as it appears on the wire, payload not yet interpreted
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawEnvelope::deserialize(deserializer)?;

        match raw.kind.as_str() {
            FOLDER_CONTENTS => serde_json::from_value(raw.payload)
                .map(Envelope::FolderContents)
                .map_err(serde::de::Error::custom),
            _ => Ok(Envelope::Unknown { kind: raw.kind }),
        }
    }
}

/// One entry of the `/files` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub filename: String,
}

/// Body of the `/files` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileEntry>,
}

impl FilesResponse {
    /// Build from names that are already sorted and deduplicated
    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            files: names
                .into_iter()
                .map(|filename| FileEntry { filename })
                .collect(),
        }
    }
}
