// src/txnlog/mod.rs

//! The transaction log (spec §3, §4.C): one durable, tagged-union record per
//! in-flight compound, keyed by `txn_id` in the key-value store. Unlike the
//! teacher's append-only journal file, entries here live in the KV store
//! itself so recovery is a single prefix scan rather than a file-per-txn
//! directory walk (txn_logger.cpp originally backed this by leveldb; this
//! crate substitutes the sled-backed `KvStore`).

use crate::error::Result;
use crate::ids::ObjectUuid;
use crate::kv::{KvStore, TXN_PREFIX};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mirrors `CompoundType` in txn_logger.h; `None` means no undo-relevant
/// operation has been recorded yet for this slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompoundType {
    None,
    Create,
    Mkdir,
    Write,
    Rename,
    Unlink,
    Symlink,
    Link,
    Copy,
    Clone,
    Setattr,
}

/// One allocated-and-bound object within the compound (CREATE, MKDIR).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedObject {
    pub parent_id: ObjectUuid,
    pub name: String,
    pub allocated_id: ObjectUuid,
}

/// One removed directory entry (REMOVE/UNLINK).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkRecord {
    pub parent_id: ObjectUuid,
    pub name: String,
}

/// One regular-file mutation (WRITE/COPY/CLONE) whose pre-image was
/// snapshotted under `"{op_index}.bkp"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRecord {
    pub target_id: ObjectUuid,
    pub op_index: usize,
}

/// One created symlink (SYMLINK).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymlinkRecord {
    pub parent_id: ObjectUuid,
    pub name: String,
    pub target: PathBuf,
}

/// One rename (RENAME). Undo of this record is an acknowledged open gap
/// (spec §9): the executor records it so recovery can at least report the
/// in-flight rename, but does not attempt to reverse it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRecord {
    pub src_parent_id: ObjectUuid,
    pub src_name: String,
    pub dst_parent_id: ObjectUuid,
    pub dst_name: String,
    pub is_directory: bool,
}

/// A transaction log entry: everything the undo executor needs to reverse
/// one compound, independent of the live compound arguments (which may be
/// long gone by the time recovery runs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub txn_id: u64,
    pub compound_type: CompoundType,
    pub created: Vec<CreatedObject>,
    pub unlinks: Vec<UnlinkRecord>,
    pub symlinks: Vec<SymlinkRecord>,
    pub renames: Vec<RenameRecord>,
    pub writes: Vec<WriteRecord>,
    /// Per-transaction backup directory on the lower FSAL holding
    /// pre-mutation snapshots (spec §4.D).
    pub backup_dir_path: PathBuf,
}

impl TransactionLogEntry {
    pub fn new(txn_id: u64, backup_dir_path: PathBuf) -> Self {
        Self {
            txn_id,
            compound_type: CompoundType::None,
            created: Vec::new(),
            unlinks: Vec::new(),
            symlinks: Vec::new(),
            renames: Vec::new(),
            writes: Vec::new(),
            backup_dir_path,
        }
    }
}

fn txn_key(txn_id: u64) -> Vec<u8> {
    let mut k = TXN_PREFIX.to_vec();
    k.extend_from_slice(&txn_id.to_be_bytes());
    k
}

/// Persistent store of in-flight transaction log entries.
pub struct TransactionLog {
    kv: KvStore,
}

impl TransactionLog {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    pub fn append(&self, entry: &TransactionLogEntry) -> Result<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.kv.put_batch([(txn_key(entry.txn_id), bytes)])
    }

    pub fn get(&self, txn_id: u64) -> Result<Option<TransactionLogEntry>> {
        match self.kv.get(&txn_key(txn_id))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, txn_id: u64) -> Result<()> {
        self.kv.delete(&txn_key(txn_id))
    }

    /// Every entry still present; used at process start for crash recovery
    /// (spec §7) since anything left here committed neither forward nor
    /// was rolled back before the crash.
    pub fn load_all(&self) -> Result<Vec<TransactionLogEntry>> {
        self.kv
            .scan_prefix(TXN_PREFIX)
            .map(|r| r.and_then(|(_, v)| Ok(serde_json::from_slice(&v)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;

    fn sample(txn_id: u64) -> TransactionLogEntry {
        let mut e = TransactionLogEntry::new(txn_id, PathBuf::from(format!(".txn/{txn_id}")));
        e.compound_type = CompoundType::Unlink;
        e.unlinks.push(UnlinkRecord {
            parent_id: ObjectUuid::root(),
            name: "foo".to_string(),
        });
        e
    }

    #[test]
    fn append_then_get_round_trips() {
        let log = TransactionLog::new(KvStore::temporary().unwrap());
        let entry = sample(7);
        log.append(&entry).unwrap();

        let fetched = log.get(7).unwrap().unwrap();
        assert_eq!(fetched.txn_id, 7);
        assert_eq!(fetched.compound_type, CompoundType::Unlink);
        assert_eq!(fetched.unlinks.len(), 1);
    }

    #[test]
    fn remove_deletes_entry() {
        let log = TransactionLog::new(KvStore::temporary().unwrap());
        log.append(&sample(1)).unwrap();
        log.remove(1).unwrap();
        assert!(log.get(1).unwrap().is_none());
    }

    #[test]
    fn load_all_returns_every_pending_entry() {
        let log = TransactionLog::new(KvStore::temporary().unwrap());
        log.append(&sample(1)).unwrap();
        log.append(&sample(2)).unwrap();
        log.append(&sample(3)).unwrap();
        log.remove(2).unwrap();

        let mut ids: Vec<u64> = log.load_all().unwrap().iter().map(|e| e.txn_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }
}
