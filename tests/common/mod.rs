//! Common test utilities for file-watcher integration tests
//!
//! This module provides:
//! - `RecordingServer`, a stand-in master endpoint that records frames
//! - helpers for polling a condition and building snapshots

#![allow(unused_imports)]
#![allow(dead_code)]

pub mod recording_server;

use std::time::Duration;

use file_watcher::{Envelope, Snapshot};

pub use recording_server::{Frame, RecordingServer};

/// Poll `condition` until it holds, failing after 10 seconds
pub async fn eventually<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn folder_contents(name: &str, files: &[&str]) -> Envelope {
    Envelope::from(Snapshot::new(
        name,
        files.iter().map(|f| f.to_string()).collect(),
    ))
}

/// Decode a text frame as a folder snapshot
pub fn decode_snapshot(text: &str) -> Snapshot {
    match Envelope::from_json(text).expect("Invalid envelope") {
        Envelope::FolderContents(snapshot) => snapshot,
        other => panic!("expected FolderContents, got {:?}", other),
    }
}
