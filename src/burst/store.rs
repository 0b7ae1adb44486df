// src/burst/store.rs - burst_NNN directory allocation
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One allocated output directory. Never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstRun {
    pub index: u32,
    pub directory: PathBuf,
}

impl BurstRun {
    /// `burst_0500.jpeg` for position 500.
    pub fn frame_path(&self, position: i64) -> PathBuf {
        self.directory.join(frame_file_name(position))
    }
}

pub fn directory_name(index: u32) -> String {
    format!("burst_{:03}", index)
}

pub fn frame_file_name(position: i64) -> String {
    format!("burst_{:04}.jpeg", position)
}

#[derive(Debug)]
pub struct BurstStore {
    root: PathBuf,
    allocation: Mutex<()>,
}

impl BurstStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), allocation: Mutex::new(()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the lowest-numbered `burst_NNN` directory that does not exist
    /// yet. `create_dir` fails on an existing entry, so a name taken by
    /// anyone else (another process included) is skipped, never reused.
    pub fn allocate(&self) -> io::Result<BurstRun> {
        let _guard = self.allocation.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::create_dir_all(&self.root)?;
        for index in 1..=u32::MAX {
            let directory = self.root.join(directory_name(index));
            match std::fs::create_dir(&directory) {
                Ok(()) => {
                    tracing::info!("Allocated burst directory {}", directory.display());
                    return Ok(BurstRun { index, directory });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::other("no free burst directory index"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_names_are_zero_padded() {
        assert_eq!(directory_name(1), "burst_001");
        assert_eq!(directory_name(42), "burst_042");
        assert_eq!(frame_file_name(500), "burst_0500.jpeg");
        assert_eq!(frame_file_name(12345), "burst_12345.jpeg");
    }

    #[test]
    fn test_allocation_skips_existing_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("burst_001")).unwrap();
        std::fs::create_dir(dir.path().join("burst_002")).unwrap();
        let store = BurstStore::new(dir.path());
        let run = store.allocate().unwrap();
        assert_eq!(run.index, 3);
        assert!(run.directory.ends_with("burst_003"));
        assert!(run.directory.is_dir());
    }

    #[test]
    fn test_allocation_fills_lowest_gap() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("burst_002")).unwrap();
        let store = BurstStore::new(dir.path());
        assert_eq!(store.allocate().unwrap().index, 1);
        assert_eq!(store.allocate().unwrap().index, 3);
    }

    #[test]
    fn test_concurrent_allocations_never_collide() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(BurstStore::new(dir.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.allocate().unwrap().index)
            })
            .collect();
        let mut indices: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort();
        assert_eq!(indices, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_creates_missing_root() {
        let dir = tempdir().unwrap();
        let store = BurstStore::new(dir.path().join("nested").join("bursts"));
        let run = store.allocate().unwrap();
        assert_eq!(run.index, 1);
        assert!(store.root().is_dir());
    }
}
