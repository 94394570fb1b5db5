// src/lock/mod.rs

//! The path/handle lock manager (spec §3, §4.E): hierarchical reader/writer
//! locks keyed on normalized paths, acquired atomically as a set so two
//! compounds can never hold conflicting partial subsets. Grounded on
//! `lock_manager.cpp`'s `clean_paths`/`could_lock`/`try_lock_clean_paths`.

use crate::error::Result;
use crate::filesystem::path::sanitize_path;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// One path to lock and whether the hold must be exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub path: PathBuf,
    pub exclusive: bool,
}

impl LockRequest {
    pub fn shared(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), exclusive: false }
    }

    pub fn exclusive(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), exclusive: true }
    }
}

struct Entry {
    write_lock: bool,
    refcount: u32,
}

/// An acquired lock set. Dropping without calling `unlock` leaks the
/// entries (matching the teacher's explicit-release discipline); the
/// coordinator always pairs `lock`/`unlock` around a compound.
#[derive(Debug)]
pub struct LockHandle {
    paths: Vec<PathBuf>,
}

pub struct LockManager {
    paths: Mutex<BTreeMap<PathBuf, Entry>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            paths: Mutex::new(BTreeMap::new()),
        }
    }

    /// Normalizes, deduplicates (a later write request upgrades an earlier
    /// read request to exclusive, regardless of order), and returns a
    /// sorted request set.
    fn clean_paths(&self, requests: &[LockRequest]) -> Result<BTreeMap<PathBuf, bool>> {
        let mut cleaned: BTreeMap<PathBuf, bool> = BTreeMap::new();
        for req in requests {
            let normalized = sanitize_path(&req.path)?;
            let entry = cleaned.entry(normalized).or_insert(false);
            *entry = *entry || req.exclusive;
        }
        Ok(cleaned)
    }

    fn could_lock(paths: &BTreeMap<PathBuf, Entry>, path: &PathBuf, exclusive: bool) -> bool {
        match paths.get(path) {
            None => true,
            Some(entry) => !exclusive && !entry.write_lock,
        }
    }

    /// Non-blocking, all-or-nothing acquisition.
    pub fn try_lock(&self, requests: &[LockRequest]) -> Result<Option<LockHandle>> {
        let cleaned = self.clean_paths(requests)?;
        let mut paths = self.paths.lock();

        if !cleaned
            .iter()
            .all(|(path, exclusive)| Self::could_lock(&paths, path, *exclusive))
        {
            return Ok(None);
        }

        for (path, exclusive) in &cleaned {
            match paths.get_mut(path) {
                Some(entry) => entry.refcount += 1,
                None => {
                    paths.insert(
                        path.clone(),
                        Entry {
                            write_lock: *exclusive,
                            refcount: 1,
                        },
                    );
                }
            }
        }

        Ok(Some(LockHandle {
            paths: cleaned.into_keys().collect(),
        }))
    }

    /// Blocking acquisition: spins on `try_lock` under a short backoff.
    pub fn lock(&self, requests: &[LockRequest]) -> Result<LockHandle> {
        loop {
            if let Some(handle) = self.try_lock(requests)? {
                return Ok(handle);
            }
            thread::sleep(Duration::from_micros(200));
        }
    }

    pub fn unlock(&self, handle: LockHandle) {
        let mut paths = self.paths.lock();
        for path in handle.paths {
            if let Some(entry) = paths.get_mut(&path) {
                entry.refcount -= 1;
                if entry.refcount == 0 {
                    paths.remove(&path);
                }
            }
        }
    }
}
