// src/undo/mod.rs

//! The undo executor (spec §4.G): given the sequence of mutating ops a
//! failed compound actually executed, inverts them in reverse order using
//! the backup store and the identity map. Grounded on
//! `undo_executor.cpp`'s reverse-walk and `backup.c`'s restore path.
//!
//! Phase 1 ("forward replay to reconstruct handle state") is not
//! reimplemented here: this core receives ops already resolved against
//! concrete lower-FSAL handles (see `coordinator/mod.rs`'s module doc), so
//! by the time a compound reaches `end_compound` every `MutationRecord`
//! already carries what Phase 1 would have reconstructed. Only Phase 2
//! (reverse-order inverse application) remains.

use crate::backup::BackupStore;
use crate::fsal::LowerFsal;
use crate::identity::IdentityMap;
use tracing::warn;

/// One mutating op this compound actually executed, carrying everything
/// needed to invert it.
#[derive(Debug, Clone)]
pub enum MutationRecord {
    /// CREATE (non-regular) / MKDIR / SYMLINK / LINK. Inverse: unlink the
    /// created name.
    Create {
        op_index: usize,
        parent: Vec<u8>,
        name: String,
    },
    /// WRITE / COPY / CLONE. Inverse: restore from `"{op_index}.bkp"` with
    /// truncate-first.
    Write { op_index: usize, target: Vec<u8> },
    /// REMOVE / UNLINK. Inverse: rename the backup back to its original
    /// name.
    Unlink {
        op_index: usize,
        parent: Vec<u8>,
        name: String,
    },
}

impl MutationRecord {
    fn op_index(&self) -> usize {
        match self {
            MutationRecord::Create { op_index, .. } => *op_index,
            MutationRecord::Write { op_index, .. } => *op_index,
            MutationRecord::Unlink { op_index, .. } => *op_index,
        }
    }
}

pub struct UndoExecutor<'a> {
    fsal: &'a dyn LowerFsal,
    #[allow(dead_code)]
    identity: &'a IdentityMap,
}

impl<'a> UndoExecutor<'a> {
    pub fn new(fsal: &'a dyn LowerFsal, identity: &'a IdentityMap) -> Self {
        Self { fsal, identity }
    }

    /// Walks `executed` newest-first, applying each inverse. Any entry
    /// whose inverse fails is logged and execution continues (G1): the
    /// goal is the best approximation of the pre-compound state, not an
    /// all-or-nothing second transaction.
    pub fn undo(&self, executed: &[MutationRecord], backup_dir: &[u8]) {
        let backup = BackupStore::new(self.fsal);

        for record in executed.iter().rev() {
            let op_index = record.op_index();
            let outcome = match record {
                MutationRecord::Create { parent, name, .. } => self.fsal.unlink(parent, name),
                MutationRecord::Write { target, .. } => backup.restore(backup_dir, op_index, target, true),
                MutationRecord::Unlink { parent, name, .. } => {
                    backup.restore_unlinked(backup_dir, op_index, parent, name)
                }
            };

            if let Err(e) = outcome {
                warn!(op_index, error = %e, "undo of mutating op failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsal::fake::FakeFsal;
    use crate::fsal::ObjectKind;
    use crate::ids::UuidAllocator;
    use crate::kv::KvStore;

    fn new_identity() -> IdentityMap {
        let dir = tempfile::tempdir().unwrap();
        let kv1 = KvStore::open(dir.path()).unwrap();
        let kv2 = KvStore::open(dir.path()).unwrap();
        let alloc = UuidAllocator::open(kv1).unwrap();
        // leak the tempdir for the duration of the test process; acceptable
        // in a test helper
        std::mem::forget(dir);
        IdentityMap::new(kv2, alloc)
    }

    #[test]
    fn undo_of_mkdir_removes_created_directory() {
        let fsal = FakeFsal::new();
        let root = fsal.root_handle();
        let identity = new_identity();

        fsal.mkdir(&root, "newdir").unwrap();
        let executed = vec![MutationRecord::Create {
            op_index: 0,
            parent: root.clone(),
            name: "newdir".to_string(),
        }];

        let executor = UndoExecutor::new(&fsal, &identity);
        executor.undo(&executed, &root);

        assert_eq!(fsal.lookup(&root, "newdir").unwrap(), None);
    }

    #[test]
    fn undo_of_write_restores_backup_contents() {
        let fsal = FakeFsal::new();
        let root = fsal.root_handle();
        let identity = new_identity();

        let file = fsal.create(&root, "f.txt", ObjectKind::RegularFile, None).unwrap();
        fsal.write(&file, 0, b"original").unwrap();

        let backup = crate::backup::BackupStore::new(&fsal);
        let dir = backup.ensure_txn_dir(99).unwrap();
        backup.snapshot(&dir, 0, &file, 0, 8).unwrap();

        fsal.write(&file, 0, b"mutated!").unwrap();

        let executed = vec![MutationRecord::Write {
            op_index: 0,
            target: file.clone(),
        }];

        let executor = UndoExecutor::new(&fsal, &identity);
        executor.undo(&executed, &dir);

        assert_eq!(fsal.read(&file, 0, 8).unwrap(), b"original");
    }

    #[test]
    fn undo_of_unlink_restores_original_name() {
        let fsal = FakeFsal::new();
        let root = fsal.root_handle();
        let identity = new_identity();

        let victim = fsal.create(&root, "doomed.txt", ObjectKind::RegularFile, None).unwrap();
        fsal.write(&victim, 0, b"keep me").unwrap();

        let backup = crate::backup::BackupStore::new(&fsal);
        let dir = backup.ensure_txn_dir(5).unwrap();
        backup.snapshot(&dir, 0, &victim, 0, 7).unwrap();
        fsal.unlink(&root, "doomed.txt").unwrap();

        let executed = vec![MutationRecord::Unlink {
            op_index: 0,
            parent: root.clone(),
            name: "doomed.txt".to_string(),
        }];

        let executor = UndoExecutor::new(&fsal, &identity);
        executor.undo(&executed, &dir);

        let restored = fsal.lookup(&root, "doomed.txt").unwrap().unwrap();
        assert_eq!(fsal.read(&restored, 0, 7).unwrap(), b"keep me");
    }

    /// (T6) Re-running undo over the same executed set after it already
    /// succeeded once leaves the filesystem in the same state.
    #[test]
    fn undo_is_idempotent_across_repeated_runs() {
        let fsal = FakeFsal::new();
        let root = fsal.root_handle();
        let identity = new_identity();

        let file = fsal.create(&root, "f.txt", ObjectKind::RegularFile, None).unwrap();
        fsal.write(&file, 0, b"original").unwrap();

        let backup = crate::backup::BackupStore::new(&fsal);
        let dir = backup.ensure_txn_dir(42).unwrap();
        backup.snapshot(&dir, 0, &file, 0, 8).unwrap();
        fsal.write(&file, 0, b"mutated!").unwrap();

        let executed = vec![MutationRecord::Write {
            op_index: 0,
            target: file.clone(),
        }];

        let executor = UndoExecutor::new(&fsal, &identity);
        executor.undo(&executed, &dir);
        assert_eq!(fsal.read(&file, 0, 8).unwrap(), b"original");

        executor.undo(&executed, &dir);
        assert_eq!(fsal.read(&file, 0, 8).unwrap(), b"original");
    }

    #[test]
    fn undo_applies_in_reverse_order() {
        let fsal = FakeFsal::new();
        let root = fsal.root_handle();
        let identity = new_identity();

        fsal.mkdir(&root, "first").unwrap();
        fsal.mkdir(&root, "second").unwrap();

        let executed = vec![
            MutationRecord::Create {
                op_index: 0,
                parent: root.clone(),
                name: "first".to_string(),
            },
            MutationRecord::Create {
                op_index: 1,
                parent: root.clone(),
                name: "second".to_string(),
            },
        ];

        let executor = UndoExecutor::new(&fsal, &identity);
        executor.undo(&executed, &root);

        assert_eq!(fsal.lookup(&root, "first").unwrap(), None);
        assert_eq!(fsal.lookup(&root, "second").unwrap(), None);
    }
}
