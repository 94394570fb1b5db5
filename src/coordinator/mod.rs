// src/coordinator/mod.rs

//! The compound lifecycle coordinator (spec §4.F): `start_compound` →
//! per-operation backup-then-dispatch → `end_compound` (commit or
//! rollback). This is the component every other piece of the core is
//! wired together by.
//!
//! Phase-1 handle reconstruction (spec §4.G) assumes a dispatcher that
//! drives the compound through `PUTFH`/`SAVEFH`/`LOOKUP` navigation before
//! each mutating op; that navigation layer is explicitly out of scope here
//! (spec §1 excludes NFSv4 wire decoding and the top-level dispatcher). This
//! coordinator instead receives each mutating op pre-resolved against
//! concrete lower-FSAL handles, so the mutating-op record it hands the undo
//! executor already carries everything Phase 1 would have reconstructed;
//! only Phase 2 (reverse-order inverse application) remains the undo
//! executor's job. See DESIGN.md for this Open Question's resolution.

use crate::backup::BackupStore;
use crate::cleanup::AsyncCleanupWorker;
use crate::error::{Error, Result};
use crate::fsal::{LowerFsal, ObjectKind};
use crate::identity::{CompoundCache, IdentityMap};
use crate::lock::{LockHandle, LockManager, LockRequest};
use crate::txnlog::{
    CompoundType, CreatedObject, RenameRecord, SymlinkRecord, TransactionLog, TransactionLogEntry,
    UnlinkRecord, WriteRecord,
};
use crate::undo::{MutationRecord, UndoExecutor};
use crate::ids::ObjectUuid;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompoundState {
    Idle,
    Prepared,
    Executing,
}

/// One in-flight compound: everything acquired in `start_compound` and
/// released on every exit path from `end_compound` (spec §4.F "Scoped
/// acquisition").
pub struct Compound {
    txn_id: u64,
    state: CompoundState,
    cache: CompoundCache,
    log_entry: TransactionLogEntry,
    backup_dir: Vec<u8>,
    lock_handle: Option<LockHandle>,
    executed: Vec<MutationRecord>,
    next_op_index: usize,
    /// UUIDs reserved up front in `start_compound`, sized to `op_count`
    /// (spec §4.F.1). Creating ops draw from here instead of allocating on
    /// demand so the identity map's allocator lock is touched once per
    /// compound rather than once per creating op.
    uuid_pool: Vec<ObjectUuid>,
}

impl Compound {
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }
}

pub struct CoordinatorDeps<'a> {
    pub identity: &'a IdentityMap,
    pub txnlog: &'a TransactionLog,
    pub locks: &'a LockManager,
    pub fsal: &'a dyn LowerFsal,
    /// Background deleter for committed transactions' backup directories
    /// (spec §4.F.3, §4.H). `None` means every commit falls back to the
    /// synchronous delete, as if the queue were always full.
    pub cleanup: Option<&'a AsyncCleanupWorker>,
}

/// Seeds the monotonic txn-id counter with wall-clock time so ids are
/// strictly increasing within a process and unlikely to collide with a
/// prior run's ids still visible on disk (spec §3 "wall-clock-seeded").
pub struct CompoundLifecycleCoordinator<'a> {
    deps: CoordinatorDeps<'a>,
    next_txn_id: AtomicU64,
}

impl<'a> CompoundLifecycleCoordinator<'a> {
    pub fn new(deps: CoordinatorDeps<'a>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            deps,
            next_txn_id: AtomicU64::new(seed.max(1)),
        }
    }

    fn backup_store(&self) -> BackupStore<'_> {
        BackupStore::new(self.deps.fsal)
    }

    /// `start_compound` (spec §4.F.1): acquires locks for the compound's
    /// working set, allocates a txn id, creates the backup directory and
    /// transaction-log record, and pre-reserves a UUID pool sized to
    /// `op_count` (a conservative upper bound on how many ops in the
    /// compound could be creating ops).
    pub fn start_compound(&self, op_count: usize, lock_requests: &[LockRequest]) -> Result<Compound> {
        let lock_handle = self.deps.locks.lock(lock_requests)?;
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let backup_dir = match self.backup_store().ensure_txn_dir(txn_id) {
            Ok(dir) => dir,
            Err(e) => {
                self.deps.locks.unlock(lock_handle);
                return Err(e);
            }
        };

        let log_entry = TransactionLogEntry::new(
            txn_id,
            PathBuf::from(crate::backup::BACKUP_ROOT_NAME).join(txn_id.to_string()),
        );
        if let Err(e) = self.deps.txnlog.append(&log_entry) {
            self.deps.locks.unlock(lock_handle);
            return Err(e);
        }

        let mut uuid_pool = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            match self.deps.identity.allocate_uuid() {
                Ok(uuid) => uuid_pool.push(uuid),
                Err(e) => {
                    self.deps.locks.unlock(lock_handle);
                    return Err(e);
                }
            }
        }

        Ok(Compound {
            txn_id,
            state: CompoundState::Prepared,
            cache: CompoundCache::with_capacity(op_count),
            log_entry,
            backup_dir,
            lock_handle: Some(lock_handle),
            executed: Vec::with_capacity(op_count),
            next_op_index: 0,
            uuid_pool,
        })
    }

    fn next_index(compound: &mut Compound) -> usize {
        let idx = compound.next_op_index;
        compound.next_op_index += 1;
        idx
    }

    fn set_compound_type(&self, compound: &mut Compound, ty: CompoundType) {
        if compound.log_entry.compound_type == CompoundType::None {
            compound.log_entry.compound_type = ty;
        }
    }

    /// CREATE / MKDIR / SYMLINK / LINK: snapshot nothing (the object is
    /// new), consume a UUID from the identity map, create on the lower
    /// FSAL, stage a `Create` cache entry.
    pub fn create(
        &self,
        compound: &mut Compound,
        parent: ObjectUuid,
        name: &str,
        kind: ObjectKind,
        symlink_target: Option<&Path>,
    ) -> Result<ObjectUuid> {
        compound.state = CompoundState::Executing;
        let parent_handle = self
            .deps
            .identity
            .resolve_handle(parent, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let uuid = compound.uuid_pool.pop().ok_or(Error::PoolExhausted)?;
        let host_handle = self.deps.fsal.create(&parent_handle, name, kind, symlink_target)?;
        self.deps
            .identity
            .stage_create(uuid, host_handle.clone(), &mut compound.cache);

        let op_index = Self::next_index(compound);
        match kind {
            ObjectKind::Directory => {
                self.set_compound_type(compound, CompoundType::Mkdir);
                compound.executed.push(MutationRecord::Create {
                    op_index,
                    parent: parent_handle,
                    name: name.to_string(),
                });
            }
            ObjectKind::Symlink => {
                self.set_compound_type(compound, CompoundType::Symlink);
                compound.log_entry.symlinks.push(SymlinkRecord {
                    parent_id: parent,
                    name: name.to_string(),
                    target: symlink_target.unwrap_or(Path::new("")).to_path_buf(),
                });
                compound.executed.push(MutationRecord::Create {
                    op_index,
                    parent: parent_handle,
                    name: name.to_string(),
                });
            }
            _ => {
                self.set_compound_type(compound, CompoundType::Create);
                compound.executed.push(MutationRecord::Create {
                    op_index,
                    parent: parent_handle,
                    name: name.to_string(),
                });
            }
        }
        compound.log_entry.created.push(CreatedObject {
            parent_id: parent,
            name: name.to_string(),
            allocated_id: uuid,
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        Ok(uuid)
    }

    /// WRITE: snapshot the byte range about to be overwritten (expanded to
    /// whole file if the write would exceed it), then write through.
    pub fn write(&self, compound: &mut Compound, target: ObjectUuid, offset: u64, data: &[u8]) -> Result<usize> {
        compound.state = CompoundState::Executing;
        let handle = self
            .deps
            .identity
            .resolve_handle(target, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let op_index = Self::next_index(compound);
        self.backup_store()
            .snapshot(&compound.backup_dir, op_index, &handle, offset, data.len() as u64)?;

        self.set_compound_type(compound, CompoundType::Write);
        compound.log_entry.writes.push(WriteRecord {
            target_id: target,
            op_index,
        });
        compound.executed.push(MutationRecord::Write {
            op_index,
            target: handle.clone(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps.fsal.write(&handle, offset, data)
    }

    /// REMOVE/UNLINK: snapshot the victim, then remove it, then stage a
    /// `Delete` cache entry so resolve calls within this compound see it
    /// gone.
    pub fn unlink(&self, compound: &mut Compound, parent: ObjectUuid, name: &str) -> Result<()> {
        compound.state = CompoundState::Executing;
        let parent_handle = self
            .deps
            .identity
            .resolve_handle(parent, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let victim_handle = self
            .deps
            .fsal
            .lookup(&parent_handle, name)?
            .ok_or_else(|| Error::InvalidState(format!("no such entry: {name}")))?;
        let victim_uuid = self.deps.identity.resolve_uuid(&victim_handle, &compound.cache)?;

        let op_index = Self::next_index(compound);
        self.backup_store()
            .snapshot(&compound.backup_dir, op_index, &victim_handle, 0, u64::MAX)?;

        self.set_compound_type(compound, CompoundType::Unlink);
        compound.log_entry.unlinks.push(UnlinkRecord {
            parent_id: parent,
            name: name.to_string(),
        });
        compound.executed.push(MutationRecord::Unlink {
            op_index,
            parent: parent_handle.clone(),
            name: name.to_string(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps.fsal.unlink(&parent_handle, name)?;

        if let Some(uuid) = victim_uuid {
            self.deps
                .identity
                .mark_deleted(uuid, Some(victim_handle), &mut compound.cache);
        }

        Ok(())
    }

    /// RENAME: snapshots source (and destination, if occupied) so an
    /// offline inspector can see what was touched, but per spec §9 the
    /// inverse is not automatically applied — only logged.
    pub fn rename(
        &self,
        compound: &mut Compound,
        src_parent: ObjectUuid,
        src_name: &str,
        dst_parent: ObjectUuid,
        dst_name: &str,
        is_directory: bool,
    ) -> Result<()> {
        compound.state = CompoundState::Executing;
        let src_parent_handle = self
            .deps
            .identity
            .resolve_handle(src_parent, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;
        let dst_parent_handle = self
            .deps
            .identity
            .resolve_handle(dst_parent, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let op_index = Self::next_index(compound);
        if let Some(src_handle) = self.deps.fsal.lookup(&src_parent_handle, src_name)? {
            self.backup_store()
                .snapshot(&compound.backup_dir, op_index, &src_handle, 0, u64::MAX)?;
        }
        if let Some(dst_handle) = self.deps.fsal.lookup(&dst_parent_handle, dst_name)? {
            self.backup_store()
                .snapshot(&compound.backup_dir, op_index + 1, &dst_handle, 0, u64::MAX)?;
        }

        self.set_compound_type(compound, CompoundType::Rename);
        compound.log_entry.renames.push(RenameRecord {
            src_parent_id: src_parent,
            src_name: src_name.to_string(),
            dst_parent_id: dst_parent,
            dst_name: dst_name.to_string(),
            is_directory,
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps
            .fsal
            .rename(&src_parent_handle, src_name, &dst_parent_handle, dst_name)?;

        Ok(())
    }

    /// LINK (spec §4.F.2): consumes a pool UUID like the other creating
    /// ops, but the new name resolves to `existing`'s object rather than a
    /// freshly created one, so nothing is staged into the identity map
    /// under the consumed UUID — it's simply spent. See DESIGN.md for why
    /// crash recovery can't tell an uncommitted LINK from a committed one.
    pub fn link(&self, compound: &mut Compound, existing: ObjectUuid, parent: ObjectUuid, name: &str) -> Result<ObjectUuid> {
        compound.state = CompoundState::Executing;
        let existing_handle = self
            .deps
            .identity
            .resolve_handle(existing, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;
        let parent_handle = self
            .deps
            .identity
            .resolve_handle(parent, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let _ = compound.uuid_pool.pop().ok_or(Error::PoolExhausted)?;
        self.deps.fsal.link(&existing_handle, &parent_handle, name)?;

        let op_index = Self::next_index(compound);
        self.set_compound_type(compound, CompoundType::Link);
        compound.log_entry.created.push(CreatedObject {
            parent_id: parent,
            name: name.to_string(),
            allocated_id: existing,
        });
        compound.executed.push(MutationRecord::Create {
            op_index,
            parent: parent_handle,
            name: name.to_string(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        Ok(existing)
    }

    /// COPY (spec §4.F.2): snapshot the destination range, then copy
    /// through. Reuses the WRITE inverse since the effect on `dst` is the
    /// same shape: bytes overwritten in place.
    pub fn copy(
        &self,
        compound: &mut Compound,
        src: ObjectUuid,
        src_offset: u64,
        dst: ObjectUuid,
        dst_offset: u64,
        len: u64,
    ) -> Result<u64> {
        compound.state = CompoundState::Executing;
        let src_handle = self
            .deps
            .identity
            .resolve_handle(src, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;
        let dst_handle = self
            .deps
            .identity
            .resolve_handle(dst, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let op_index = Self::next_index(compound);
        self.backup_store()
            .snapshot(&compound.backup_dir, op_index, &dst_handle, dst_offset, len)?;

        self.set_compound_type(compound, CompoundType::Copy);
        compound.log_entry.writes.push(WriteRecord {
            target_id: dst,
            op_index,
        });
        compound.executed.push(MutationRecord::Write {
            op_index,
            target: dst_handle.clone(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps.fsal.copy_range(&src_handle, src_offset, &dst_handle, dst_offset, len)
    }

    /// CLONE (spec §4.F.2): same shape as COPY, dispatched through the
    /// lower FSAL's reflink-style verb instead of a byte copy.
    pub fn clone(
        &self,
        compound: &mut Compound,
        src: ObjectUuid,
        src_offset: u64,
        dst: ObjectUuid,
        dst_offset: u64,
        len: u64,
    ) -> Result<bool> {
        compound.state = CompoundState::Executing;
        let src_handle = self
            .deps
            .identity
            .resolve_handle(src, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;
        let dst_handle = self
            .deps
            .identity
            .resolve_handle(dst, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let op_index = Self::next_index(compound);
        self.backup_store()
            .snapshot(&compound.backup_dir, op_index, &dst_handle, dst_offset, len)?;

        self.set_compound_type(compound, CompoundType::Clone);
        compound.log_entry.writes.push(WriteRecord {
            target_id: dst,
            op_index,
        });
        compound.executed.push(MutationRecord::Write {
            op_index,
            target: dst_handle.clone(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps.fsal.clone_range(&src_handle, src_offset, &dst_handle, dst_offset, len)
    }

    /// SETATTR with a size change (spec §4.F.2): snapshots the whole
    /// current file before truncating, so shrinking or growing are both
    /// reversible (spec's literal example is truncate-to-0; the whole-file
    /// snapshot generalizes that to any size change rather than leaving
    /// growth unreversed).
    pub fn setattr_size(&self, compound: &mut Compound, target: ObjectUuid, new_size: u64) -> Result<()> {
        compound.state = CompoundState::Executing;
        let handle = self
            .deps
            .identity
            .resolve_handle(target, &compound.cache)?
            .ok_or(Error::HandleUnknown)?;

        let op_index = Self::next_index(compound);
        self.backup_store()
            .snapshot(&compound.backup_dir, op_index, &handle, 0, u64::MAX)?;

        self.set_compound_type(compound, CompoundType::Setattr);
        compound.log_entry.writes.push(WriteRecord {
            target_id: target,
            op_index,
        });
        compound.executed.push(MutationRecord::Write {
            op_index,
            target: handle.clone(),
        });
        self.deps.txnlog.append(&compound.log_entry)?;

        self.deps.fsal.truncate(&handle, new_size)
    }

    /// `end_compound` (spec §4.F.3): commit on success, invoke the undo
    /// executor on failure. Every exit path unlocks and discards the
    /// compound cache.
    pub fn end_compound(&self, mut compound: Compound, success: bool) -> Result<()> {
        let lock_handle = compound.lock_handle.take();
        let result = if success {
            self.commit(&mut compound)
        } else {
            self.rollback(&mut compound)
        };

        if let Some(handle) = lock_handle {
            self.deps.locks.unlock(handle);
        }
        result
    }

    fn commit(&self, compound: &mut Compound) -> Result<()> {
        let cache = std::mem::take(&mut compound.cache);
        self.deps.identity.commit(cache)?;
        self.deps.txnlog.remove(compound.txn_id)?;

        // spec §4.F.3: submit the backup directory to the async cleanup
        // worker, falling back to synchronous deletion if the worker
        // refuses (queue full, or none wired up at all).
        let needs_sync_delete = match self.deps.cleanup {
            Some(worker) => match worker.push(compound.txn_id, compound.backup_dir.clone()) {
                Ok(()) => false,
                Err(e) => {
                    warn!(txn_id = compound.txn_id, error = %e, "cleanup worker refused backup dir, deleting synchronously");
                    true
                }
            },
            None => true,
        };
        if needs_sync_delete {
            if let Err(e) = self.backup_store().delete_txn_dir(compound.txn_id) {
                warn!(txn_id = compound.txn_id, error = %e, "failed to delete backup dir after commit");
            }
        }
        Ok(())
    }

    fn rollback(&self, compound: &mut Compound) -> Result<()> {
        let executor = UndoExecutor::new(self.deps.fsal, self.deps.identity);
        executor.undo(&compound.executed, &compound.backup_dir);

        let cache = std::mem::take(&mut compound.cache);
        self.deps.identity.discard(cache);
        self.deps.txnlog.remove(compound.txn_id)?;

        if let Err(e) = self.backup_store().delete_txn_dir(compound.txn_id) {
            warn!(txn_id = compound.txn_id, error = %e, "failed to delete backup dir after rollback");
        }
        info!(txn_id = compound.txn_id, "compound rolled back");
        Ok(())
    }
}
