// src/backup/mod.rs

//! The backup store (spec §3, §4.D): a per-transaction directory on the
//! lower FSAL holding snapshots of objects about to be mutated, so the undo
//! executor can restore them on rollback. Grounded on backup.c's
//! `txnfs_create_or_lookup_backup_dir`/`txnfs_backup_file` (clone-then-copy
//! fallback, `"{opidx}.bkp"` naming).

use crate::fsal::{LowerFsal, ObjectKind};
use crate::error::Result;
use tracing::{debug, warn};

/// Well-known root directory name under the export root (spec §3, §6).
pub const BACKUP_ROOT_NAME: &str = ".txn";

fn backup_name(op_index: usize) -> String {
    format!("{op_index}.bkp")
}

pub struct BackupStore<'a> {
    fsal: &'a dyn LowerFsal,
}

impl<'a> BackupStore<'a> {
    pub fn new(fsal: &'a dyn LowerFsal) -> Self {
        Self { fsal }
    }

    /// Lookup-or-create `.txn` and `.txn/{txn_id}` under the export root.
    /// Idempotent: safe to call once per mutating op in a compound.
    pub fn ensure_txn_dir(&self, txn_id: u64) -> Result<Vec<u8>> {
        let root = self.fsal.root_handle();
        let bkp_root = match self.fsal.lookup(&root, BACKUP_ROOT_NAME)? {
            Some(h) => h,
            None => self.fsal.mkdir(&root, BACKUP_ROOT_NAME)?,
        };
        let txn_name = txn_id.to_string();
        match self.fsal.lookup(&bkp_root, &txn_name)? {
            Some(h) => Ok(h),
            None => self.fsal.mkdir(&bkp_root, &txn_name),
        }
    }

    /// Snapshot `source_handle` into `dir_handle` under `"{op_index}.bkp"`.
    pub fn snapshot(
        &self,
        dir_handle: &[u8],
        op_index: usize,
        source_handle: &[u8],
        offset: u64,
        length: u64,
    ) -> Result<()> {
        let name = backup_name(op_index);
        match self.fsal.kind(source_handle)? {
            ObjectKind::RegularFile => {
                let filesize = self.fsal.size(source_handle)?;
                let dst = self
                    .fsal
                    .create(dir_handle, &name, ObjectKind::RegularFile, None)?;
                if offset >= filesize {
                    return Ok(());
                }
                let want = length.min(filesize - offset);
                let cloned = self
                    .fsal
                    .clone_range(source_handle, offset, &dst, 0, want)?;
                if !cloned {
                    debug!(op_index, "clone unsupported, falling back to copy");
                    self.fsal.copy_range(source_handle, offset, &dst, 0, want)?;
                }
                Ok(())
            }
            ObjectKind::Symlink => {
                let target = self.fsal.readlink(source_handle)?;
                self.fsal
                    .create(dir_handle, &name, ObjectKind::Symlink, Some(&target))?;
                Ok(())
            }
            ObjectKind::Directory => {
                // Preserved-for-unlink: an empty placeholder; contents are
                // snapshotted per-entry by the caller, not recursively here.
                self.fsal.create(dir_handle, &name, ObjectKind::Directory, None)?;
                Ok(())
            }
            ObjectKind::Other => {
                warn!(op_index, "backup of special file type skipped");
                Ok(())
            }
        }
    }

    /// Restore `target_handle` from `"{op_index}.bkp"`, truncating first
    /// when requested (used for WRITE/COPY/CLONE undo).
    pub fn restore(
        &self,
        dir_handle: &[u8],
        op_index: usize,
        target_handle: &[u8],
        truncate_first: bool,
    ) -> Result<()> {
        let name = backup_name(op_index);
        let backup = self
            .fsal
            .lookup(dir_handle, &name)?
            .ok_or_else(|| crate::error::Error::MissingBackup(name.into()))?;

        if truncate_first {
            self.fsal.truncate(target_handle, 0)?;
        }
        let len = self.fsal.size(&backup)?;
        let cloned = self.fsal.clone_range(&backup, 0, target_handle, 0, len)?;
        if !cloned {
            self.fsal.copy_range(&backup, 0, target_handle, 0, len)?;
        }
        Ok(())
    }

    /// Rename a backup file back out to its pre-unlink name, used by the
    /// undo executor's REMOVE inverse.
    pub fn restore_unlinked(
        &self,
        dir_handle: &[u8],
        op_index: usize,
        dst_parent: &[u8],
        original_name: &str,
    ) -> Result<()> {
        let name = backup_name(op_index);
        self.fsal.rename(dir_handle, &name, dst_parent, original_name)
    }

    /// Unlink every entry then remove the directory itself (spec §4.D).
    /// Self-contained like `ensure_txn_dir`: resolves `.txn/{txn_id}` fresh
    /// rather than taking a handle, since it also needs the `.txn` parent to
    /// remove the directory's own entry.
    pub fn delete_txn_dir(&self, txn_id: u64) -> Result<()> {
        let root = self.fsal.root_handle();
        let Some(bkp_root) = self.fsal.lookup(&root, BACKUP_ROOT_NAME)? else {
            return Ok(());
        };
        let txn_name = txn_id.to_string();
        let Some(dir_handle) = self.fsal.lookup(&bkp_root, &txn_name)? else {
            return Ok(());
        };
        for entry in self.fsal.readdir(&dir_handle)? {
            if let Err(e) = self.fsal.unlink(&dir_handle, &entry) {
                warn!(entry, error = %e, "cleanup failed to unlink backup entry");
            }
        }
        self.fsal.unlink(&bkp_root, &txn_name)
    }
}
