// src/kv/mod.rs

//! Key-value store adapter (spec §4.A).
//!
//! A thin, durable wrapper around `sled` exposing exactly the verbs the rest
//! of the crate needs: batched/atomic put, point get, delete, and prefix
//! scan. Every write is flushed before returning so callers can treat a
//! successful call as durable, matching spec's "all writes are
//! synchronous/durable".
//!
//! Key space (spec §6):
//! - `uuid-{16-byte UUID}`            -> host-handle bytes (identity map forward)
//! - `hdl-{host-handle bytes}`        -> 16-byte UUID (identity map reverse)
//! - `txn-{8-byte big-endian txn_id}` -> serialized transaction log record
//! - `__next_uuid__`                  -> 16-byte next reservable UUID

use crate::error::{Error, Result};
use std::path::Path;

pub const UUID_PREFIX: &[u8] = b"uuid-";
pub const HANDLE_PREFIX: &[u8] = b"hdl-";
pub const TXN_PREFIX: &[u8] = b"txn-";
pub const NEXT_UUID_KEY: &[u8] = b"__next_uuid__";

/// Sentinel value written under each bare prefix so that `scan_prefix` always
/// has a well-defined, present lower bound even before any real entry exists.
const ANCHOR: &[u8] = b"\0anchor";

pub struct KvStore {
    db: sled::Db,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(Error::from)?;
        let store = Self { db };
        store.ensure_anchor(UUID_PREFIX)?;
        store.ensure_anchor(HANDLE_PREFIX)?;
        store.ensure_anchor(TXN_PREFIX)?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(Error::from)?;
        let store = Self { db };
        store.ensure_anchor(UUID_PREFIX)?;
        store.ensure_anchor(HANDLE_PREFIX)?;
        store.ensure_anchor(TXN_PREFIX)?;
        Ok(store)
    }

    fn ensure_anchor(&self, prefix: &[u8]) -> Result<()> {
        let mut key = prefix.to_vec();
        // anchor sorts before any real suffix because `\0` < any printable byte
        key.extend_from_slice(ANCHOR);
        if self.db.get(&key)?.is_none() {
            self.db.insert(key, b"".as_ref())?;
            self.db.flush()?;
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|ivec| ivec.to_vec()))
    }

    pub fn put_batch<I>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>,
    {
        let mut batch = sled::Batch::default();
        for (k, v) in pairs {
            batch.insert(k, v);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn delete_batch<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut batch = sled::Batch::default();
        for k in keys {
            batch.remove(k);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Apply writes and deletes as a single atomic batch.
    pub fn put_atomic(
        &self,
        writes: Vec<(Vec<u8>, Vec<u8>)>,
        deletes: Vec<Vec<u8>>,
    ) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (k, v) in writes {
            batch.insert(k, v);
        }
        for k in deletes {
            batch.remove(k);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    /// Lazily scan all entries under `prefix`, skipping the anchor sentinel.
    pub fn scan_prefix(&self, prefix: &[u8]) -> impl Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> {
        let anchor_suffix = ANCHOR;
        self.db.scan_prefix(prefix).filter_map(move |entry| {
            match entry {
                Ok((k, v)) => {
                    if k.ends_with(anchor_suffix) {
                        None
                    } else {
                        Some(Ok((k.to_vec(), v.to_vec())))
                    }
                }
                Err(e) => Some(Err(Error::from(e))),
            }
        })
    }
}
