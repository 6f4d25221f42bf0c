//!
//! Key to artifact stores used for best-effort caching of path sets and for
//! solution/multiplier snapshots.
//!
use super::error::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A flat blob store addressed by string keys.
///
/// The serialization format of a blob is decided by the caller.
pub trait ArtifactStore: Send + Sync {
    fn exists(&self, key: &str) -> bool;
    /// `Ok(None)` when the key is absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, blob: &[u8]) -> Result<()>;
}

/// Stores every artifact as a file named `key` inside a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> FsStore {
        FsStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl ArtifactStore for FsStore {
    fn exists(&self, key: &str) -> bool {
        self.path_of(key).is_file()
    }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_of(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // last writer wins when processes race on the same key
        std::fs::write(self.path_of(key), blob)?;
        Ok(())
    }
}

/// In-process store, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
    /// a writer that panicked cannot leave a map half-updated
    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
    pub fn len(&self) -> usize {
        self.blobs().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactStore for MemoryStore {
    fn exists(&self, key: &str) -> bool {
        self.blobs().contains_key(key)
    }
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs().get(key).cloned())
    }
    fn put(&self, key: &str, blob: &[u8]) -> Result<()> {
        self.blobs().insert(key.to_string(), blob.to_vec());
        Ok(())
    }
}
