// src/identity/mod.rs

//! The identity map: a persistent, crash-safe bijection between UUIDs and
//! lower-FSAL host-handles, plus the per-compound write-back cache that lets
//! a compound read its own uncommitted writes (spec §3, §4.B).

use crate::error::Result;
use crate::ids::{ObjectUuid, UuidAllocator};
use crate::kv::{KvStore, HANDLE_PREFIX, UUID_PREFIX};
use tracing::{debug, warn};

/// Small compounds (the common case) don't need the cache vector to grow at
/// all; this bounds the initial allocation for pathological huge compounds.
const CACHE_CAPACITY_CAP: usize = 64;

/// A single write-back cache entry (spec §3 "Compound Cache").
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// This compound created a new object and allocated `uuid`.
    Create { uuid: ObjectUuid, host_handle: Vec<u8> },
    /// This compound destroyed an object. `host_handle` is carried along
    /// when known so commit doesn't need an extra persistent lookup.
    Delete {
        uuid: ObjectUuid,
        host_handle: Option<Vec<u8>>,
    },
}

impl CacheEntry {
    fn uuid(&self) -> ObjectUuid {
        match self {
            CacheEntry::Create { uuid, .. } => *uuid,
            CacheEntry::Delete { uuid, .. } => *uuid,
        }
    }
}

/// Per-compound write-back cache. Append-only during the compound; scanned
/// linearly (most-recent-first) at lookup and commit time.
#[derive(Debug, Default)]
pub struct CompoundCache {
    entries: Vec<CacheEntry>,
}

impl CompoundCache {
    pub fn with_capacity(op_count: usize) -> Self {
        Self {
            entries: Vec::with_capacity(op_count.min(CACHE_CAPACITY_CAP)),
        }
    }

    pub fn push(&mut self, entry: CacheEntry) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Latest cache entry touching `uuid`, scanning newest-first so a later
    /// Delete shadows an earlier Create within the same compound.
    fn latest_for_uuid(&self, uuid: ObjectUuid) -> Option<&CacheEntry> {
        self.entries.iter().rev().find(|e| e.uuid() == uuid)
    }

    fn latest_for_handle(&self, host_handle: &[u8]) -> Option<&CacheEntry> {
        self.entries.iter().rev().find(|e| match e {
            CacheEntry::Create { host_handle: h, .. } => h == host_handle,
            CacheEntry::Delete {
                host_handle: Some(h),
                ..
            } => h == host_handle,
            CacheEntry::Delete { host_handle: None, .. } => false,
        })
    }
}

fn uuid_key(uuid: ObjectUuid) -> Vec<u8> {
    let mut k = UUID_PREFIX.to_vec();
    k.extend_from_slice(&uuid.to_bytes());
    k
}

fn handle_key(host_handle: &[u8]) -> Vec<u8> {
    let mut k = HANDLE_PREFIX.to_vec();
    k.extend_from_slice(host_handle);
    k
}

pub struct IdentityMap {
    kv: KvStore,
    allocator: UuidAllocator,
}

impl IdentityMap {
    /// Note: takes ownership of one `KvStore` handle for the allocator and
    /// expects a second, cheaply-clonable handle for itself — callers
    /// typically open one `KvStore` and pass it here twice since sled's `Db`
    /// is itself a cheap `Arc`-backed handle.
    pub fn new(kv: KvStore, allocator: UuidAllocator) -> Self {
        Self { kv, allocator }
    }

    pub fn allocate_uuid(&self) -> Result<ObjectUuid> {
        self.allocator.allocate()
    }

    /// Allocates a UUID and stages a `Create` entry in `cache`. The caller
    /// must already be inside a compound (the cache argument enforces this
    /// at the type level: there is no path to a `CompoundCache` outside the
    /// coordinator's `start_compound`/`end_compound` bracket).
    pub fn bind_new(&self, host_handle: Vec<u8>, cache: &mut CompoundCache) -> Result<ObjectUuid> {
        let uuid = self.allocate_uuid()?;
        cache.push(CacheEntry::Create { uuid, host_handle });
        Ok(uuid)
    }

    /// Stages a `Create` entry for a UUID already drawn from a compound's
    /// pre-allocated pool (spec §4.F.1), skipping a fresh allocation.
    pub fn stage_create(&self, uuid: ObjectUuid, host_handle: Vec<u8>, cache: &mut CompoundCache) {
        cache.push(CacheEntry::Create { uuid, host_handle });
    }

    pub fn mark_deleted(
        &self,
        uuid: ObjectUuid,
        host_handle: Option<Vec<u8>>,
        cache: &mut CompoundCache,
    ) {
        cache.push(CacheEntry::Delete { uuid, host_handle });
    }

    /// Cache first, then the persistent reverse index.
    pub fn resolve_uuid(&self, host_handle: &[u8], cache: &CompoundCache) -> Result<Option<ObjectUuid>> {
        if let Some(entry) = cache.latest_for_handle(host_handle) {
            return Ok(match entry {
                CacheEntry::Create { uuid, .. } => Some(*uuid),
                CacheEntry::Delete { .. } => None,
            });
        }
        match self.kv.get(&handle_key(host_handle))? {
            Some(bytes) => Ok(Some(ObjectUuid::from_wire(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Cache first, then the persistent forward index.
    pub fn resolve_handle(&self, uuid: ObjectUuid, cache: &CompoundCache) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = cache.latest_for_uuid(uuid) {
            return Ok(match entry {
                CacheEntry::Create { host_handle, .. } => Some(host_handle.clone()),
                CacheEntry::Delete { .. } => None,
            });
        }
        self.kv.get(&uuid_key(uuid))
    }

    /// Same as `resolve_handle` but ignores any in-flight cache — used by
    /// the undo executor, which must never observe uncommitted state (G3).
    pub fn resolve_handle_persistent(&self, uuid: ObjectUuid) -> Result<Option<Vec<u8>>> {
        self.kv.get(&uuid_key(uuid))
    }

    pub fn resolve_uuid_persistent(&self, host_handle: &[u8]) -> Result<Option<ObjectUuid>> {
        match self.kv.get(&handle_key(host_handle))? {
            Some(bytes) => Ok(Some(ObjectUuid::from_wire(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically applies every cache entry to the persistent indices.
    pub fn commit(&self, cache: CompoundCache) -> Result<()> {
        let mut writes = Vec::new();
        let mut deletes = Vec::new();

        for entry in cache.entries {
            match entry {
                CacheEntry::Create { uuid, host_handle } => {
                    writes.push((uuid_key(uuid), host_handle.clone()));
                    writes.push((handle_key(&host_handle), uuid.to_bytes().to_vec()));
                }
                CacheEntry::Delete { uuid, host_handle } => {
                    let handle = match host_handle {
                        Some(h) => Some(h),
                        None => self.kv.get(&uuid_key(uuid))?,
                    };
                    deletes.push(uuid_key(uuid));
                    if let Some(h) = handle {
                        deletes.push(handle_key(&h));
                    } else {
                        warn!(%uuid, "commit: delete with no known handle, forward index only cleared");
                    }
                }
            }
        }

        self.kv.put_atomic(writes, deletes)
    }

    /// Drops the cache unchanged; persistent state is untouched.
    pub fn discard(&self, _cache: CompoundCache) {
        debug!("identity map cache discarded");
    }

    /// Root bootstrap (spec §4.B): on first lookup of the export root, bind
    /// the reserved root UUID to whatever host-handle the lower FSAL returns
    /// for its export root, outside of any compound.
    pub fn ensure_root(&self, root_host_handle: &[u8]) -> Result<()> {
        if self.kv.get(&handle_key(root_host_handle))?.is_some() {
            return Ok(());
        }
        let root = ObjectUuid::root();
        self.kv.put_atomic(
            vec![
                (uuid_key(root), root_host_handle.to_vec()),
                (handle_key(root_host_handle), root.to_bytes().to_vec()),
            ],
            vec![],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;

    fn new_map() -> (tempfile::TempDir, IdentityMap) {
        let dir = tempfile::tempdir().unwrap();
        let kv = KvStore::open(dir.path()).unwrap();
        let kv2 = KvStore::open(dir.path()).unwrap();
        let alloc = UuidAllocator::open(kv).unwrap();
        (dir, IdentityMap::new(kv2, alloc))
    }

    #[test]
    fn bind_new_is_read_your_writes_until_discard() {
        let (_d, map) = new_map();
        let mut cache = CompoundCache::with_capacity(4);

        let uuid = map.bind_new(b"handle-1".to_vec(), &mut cache).unwrap();
        assert_eq!(
            map.resolve_handle(uuid, &cache).unwrap(),
            Some(b"handle-1".to_vec())
        );
        assert_eq!(
            map.resolve_uuid(b"handle-1", &cache).unwrap(),
            Some(uuid)
        );

        // Nothing persisted until commit.
        assert_eq!(map.resolve_handle_persistent(uuid).unwrap(), None);

        map.discard(cache);
        assert_eq!(map.resolve_handle_persistent(uuid).unwrap(), None);
    }

    #[test]
    fn commit_applies_create_to_both_indices() {
        let (_d, map) = new_map();
        let mut cache = CompoundCache::with_capacity(1);
        let uuid = map.bind_new(b"handle-x".to_vec(), &mut cache).unwrap();
        map.commit(cache).unwrap();

        assert_eq!(
            map.resolve_handle_persistent(uuid).unwrap(),
            Some(b"handle-x".to_vec())
        );
        assert_eq!(
            map.resolve_uuid_persistent(b"handle-x").unwrap(),
            Some(uuid)
        );
    }

    #[test]
    fn commit_applies_delete_to_both_indices() {
        let (_d, map) = new_map();
        let mut cache = CompoundCache::with_capacity(1);
        let uuid = map.bind_new(b"handle-y".to_vec(), &mut cache).unwrap();
        map.commit(cache).unwrap();

        let mut cache2 = CompoundCache::with_capacity(1);
        map.mark_deleted(uuid, Some(b"handle-y".to_vec()), &mut cache2);
        map.commit(cache2).unwrap();

        assert_eq!(map.resolve_handle_persistent(uuid).unwrap(), None);
        assert_eq!(map.resolve_uuid_persistent(b"handle-y").unwrap(), None);
    }

    /// (T1) After commit, the forward and reverse indices agree: the UUID's
    /// handle resolves back to that same UUID and nothing else.
    #[test]
    fn committed_indices_are_bijective() {
        let (_d, map) = new_map();
        let mut cache = CompoundCache::with_capacity(2);
        let a = map.bind_new(b"handle-a".to_vec(), &mut cache).unwrap();
        let b = map.bind_new(b"handle-b".to_vec(), &mut cache).unwrap();
        map.commit(cache).unwrap();

        assert_eq!(map.resolve_uuid_persistent(b"handle-a").unwrap(), Some(a));
        assert_eq!(map.resolve_uuid_persistent(b"handle-b").unwrap(), Some(b));
        assert_eq!(map.resolve_handle_persistent(a).unwrap(), Some(b"handle-a".to_vec()));
        assert_eq!(map.resolve_handle_persistent(b).unwrap(), Some(b"handle-b".to_vec()));
        assert_ne!(a, b);
    }

    #[test]
    fn root_bootstrap_is_idempotent() {
        let (_d, map) = new_map();
        map.ensure_root(b"root-handle").unwrap();
        map.ensure_root(b"root-handle").unwrap();

        assert_eq!(
            map.resolve_handle_persistent(ObjectUuid::root()).unwrap(),
            Some(b"root-handle".to_vec())
        );
    }
}
