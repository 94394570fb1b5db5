// src/lib.rs

//! Transactional stackable FSAL core.
//!
//! Sits between an NFSv4 compound dispatcher and a lower, POSIX-style
//! filesystem, giving a sequence of mutating ops within one compound
//! all-or-nothing semantics: either every op in the compound is durably
//! visible, or none is. Four subsystems do the work:
//!
//! - [`identity`]: the UUID-to-host-handle map clients see as their wire
//!   handle, with a per-compound write-back cache for read-your-writes.
//! - [`txnlog`] + [`backup`]: the durable per-compound undo inventory and
//!   the pre-mutation snapshots it points at.
//! - [`lock`]: path-keyed, all-or-nothing reader/writer locking across a
//!   compound's full op set.
//! - [`coordinator`] + [`undo`]: compound lifecycle (start/op/commit or
//!   rollback) and the reverse-order inverse executor rollback runs.
//!
//! [`recovery`] replays the transaction log at process start for whatever a
//! crash left neither committed nor rolled back. [`cleanup`] drains
//! committed transactions' backup directories off the hot path.

pub mod backup;
pub mod cleanup;
pub mod config;
pub mod coordinator;
mod error;
pub mod filesystem;
pub mod fsal;
pub mod identity;
pub mod ids;
pub mod kv;
pub mod lock;
pub mod recovery;
pub mod txnlog;
pub mod undo;

pub use backup::BackupStore;
pub use cleanup::AsyncCleanupWorker;
pub use config::TxnFsalConfig;
pub use coordinator::{Compound, CompoundLifecycleCoordinator, CoordinatorDeps};
pub use error::{Error, Result};
pub use fsal::{LowerFsal, ObjectKind};
pub use identity::{CacheEntry, CompoundCache, IdentityMap};
pub use ids::{ObjectUuid, UuidAllocator};
pub use kv::KvStore;
pub use lock::{LockHandle, LockManager, LockRequest};
pub use recovery::{recover_all, RecoveryReport};
pub use txnlog::{CompoundType, TransactionLog, TransactionLogEntry};
pub use undo::{MutationRecord, UndoExecutor};
