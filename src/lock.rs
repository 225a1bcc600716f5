//! Advisory per-file locks.
//!
//! Index rebuilds and FID compaction take the write guard for a path; render sessions
//! take the read guard for the files they read. Locks only coordinate callers sharing
//! the same [`IndexLocks`] handle; they are not OS file locks.

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ReadGuard = ArcRwLockReadGuard<RawRwLock, ()>;
pub type WriteGuard = ArcRwLockWriteGuard<RawRwLock, ()>;

/// Cheaply cloneable registry of per-path reader/writer locks.
#[derive(Debug, Clone, Default)]
pub struct IndexLocks {
    inner: Arc<Mutex<FxHashMap<PathBuf, Arc<RwLock<()>>>>>,
}

impl IndexLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        // Canonicalise when possible so `a/b.qix` and `./a/b.qix` share a lock.
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut map = self.inner.lock();
        // Entries referenced only by the map have no guard or pending caller.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(map.entry(key).or_default())
    }

    /// Number of paths with a live lock entry.
    pub fn tracked_paths(&self) -> usize {
        self.inner.lock().len()
    }

    /// Shared guard; blocks while a writer holds the path.
    pub fn read(&self, path: &Path) -> ReadGuard {
        self.lock_for(path).read_arc()
    }

    /// Exclusive guard; blocks while any reader or writer holds the path.
    pub fn write(&self, path: &Path) -> WriteGuard {
        self.lock_for(path).write_arc()
    }

    pub fn try_write(&self, path: &Path) -> Option<WriteGuard> {
        self.lock_for(path).try_write_arc()
    }
}
