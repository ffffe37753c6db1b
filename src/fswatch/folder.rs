//! A folder registered for watching

use std::fs;
use std::path::{Path, PathBuf};

use crate::debounce::Debouncer;
use crate::error::Result;
use crate::protocol::Snapshot;

/// A watched folder and the debouncer that settles its change bursts
#[derive(Debug)]
pub struct WatchedFolder {
    /// Name as supplied by the operator, reported in snapshots
    name: String,
    /// Canonical path, matched against notification parents
    path: PathBuf,
    debouncer: Debouncer<()>,
}

impl WatchedFolder {
    pub(crate) fn new(name: String, path: PathBuf, debouncer: Debouncer<()>) -> Self {
        Self {
            name,
            path,
            debouncer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Signal that something in the folder changed
    pub fn touch(&self) {
        self.debouncer.set(());
    }

    /// Read the folder's current regular files
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::new(self.name.clone(), current_files(&self.path)?))
    }
}

/// Names of the regular files directly inside `path`, in enumeration order.
///
/// Symlinks, directories and other special entries are skipped.
pub fn current_files(path: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(path)? {
        let entry = entry?;
        // DirEntry::file_type does not follow symlinks
        if entry.file_type()?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sorted(mut files: Vec<String>) -> Vec<String> {
        files.sort();
        files
    }

    #[test]
    fn test_current_files_lists_regular_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.log"), "b").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("deep.txt"), "d").unwrap();

        let files = sorted(current_files(dir.path()).unwrap());
        assert_eq!(files, vec!["a.txt", "b.log"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_current_files_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("real.txt"), "r").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        assert_eq!(current_files(dir.path()).unwrap(), vec!["real.txt"]);
    }

    #[test]
    fn test_current_files_empty_folder() {
        let dir = TempDir::new().unwrap();
        assert!(current_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_current_files_missing_folder() {
        let dir = TempDir::new().unwrap();
        assert!(current_files(&dir.path().join("gone")).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_uses_configured_name() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.txt"), "x").unwrap();

        let folder = WatchedFolder::new(
            "inbox".to_string(),
            dir.path().to_path_buf(),
            Debouncer::new(std::time::Duration::from_millis(50), |_| {}),
        );

        let snapshot = folder.snapshot().unwrap();
        assert_eq!(snapshot.name, "inbox");
        assert_eq!(snapshot.files, vec!["x.txt"]);
    }
}
