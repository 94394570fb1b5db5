// src/config.rs

//! Service-wide configuration.
//!
//! Mirrors the teacher's `TransactionConfig::new` pattern: one constructor
//! that derives sensible defaults, everything else explicit.

use std::path::PathBuf;

/// Default async cleanup queue depth (spec §6).
pub const DEFAULT_CLEANUP_QUEUE_CAPACITY: usize = 131_072;

/// The well-known backup root name under the export root (spec §3, §6).
pub const TXN_BACKUP_ROOT: &str = ".txn";

#[derive(Debug, Clone)]
pub struct TxnFsalConfig {
    /// Directory for the sled database backing the identity map and
    /// transaction log.
    pub kv_path: PathBuf,
    /// Export root on the lower FSAL. Not user-tunable per spec §6 (it comes
    /// from the embedding dispatcher's export configuration), but required
    /// to derive the backup root.
    pub export_root: PathBuf,
    /// Bound on the async cleanup worker's ring buffer.
    pub cleanup_queue_capacity: usize,
}

impl TxnFsalConfig {
    pub fn new(kv_path: PathBuf, export_root: PathBuf) -> Self {
        Self {
            kv_path,
            export_root,
            cleanup_queue_capacity: DEFAULT_CLEANUP_QUEUE_CAPACITY,
        }
    }

    pub fn with_cleanup_queue_capacity(mut self, capacity: usize) -> Self {
        self.cleanup_queue_capacity = capacity;
        self
    }

    pub fn backup_root(&self) -> PathBuf {
        self.export_root.join(TXN_BACKUP_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TxnFsalConfig::new(PathBuf::from("/var/lib/txnfsal/db"), PathBuf::from("/export"));
        assert_eq!(cfg.cleanup_queue_capacity, DEFAULT_CLEANUP_QUEUE_CAPACITY);
        assert_eq!(cfg.backup_root(), PathBuf::from("/export/.txn"));
    }
}
