// src/cleanup/mod.rs

//! The async cleanup worker (spec §3, §4.H): a bounded queue of committed
//! transactions' backup directories, drained by one dedicated thread so
//! `end_compound` doesn't pay for directory deletion on the caller's
//! thread. Falls back to synchronous deletion when the queue is full.

use crate::backup::BackupStore;
use crate::error::{Error, Result};
use crate::fsal::LowerFsal;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

struct Queue {
    items: Mutex<VecDeque<(u64, Vec<u8>)>>,
    capacity: usize,
}

impl Queue {
    fn push(&self, txn_id: u64, backup_dir: Vec<u8>) -> Result<()> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(Error::QueueFull);
        }
        items.push_back((txn_id, backup_dir));
        Ok(())
    }

    fn pop_many(&self, n: usize) -> Vec<(u64, Vec<u8>)> {
        let mut items = self.items.lock();
        let take = n.min(items.len());
        items.drain(..take).collect()
    }
}

/// Spawns one worker thread at export initialization (spec §4.H). Dropping
/// this handle signals the worker to exit after draining what's queued.
pub struct AsyncCleanupWorker {
    queue: Arc<Queue>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AsyncCleanupWorker {
    pub fn spawn(capacity: usize, fsal: Arc<dyn LowerFsal>) -> Self {
        let queue = Arc::new(Queue {
            items: Mutex::new(VecDeque::new()),
            capacity,
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_queue = Arc::clone(&queue);
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || worker_loop(worker_queue, worker_shutdown, fsal));

        Self {
            queue,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Enqueues a committed transaction's backup directory for background
    /// deletion. Returns `QueueFull` if the queue is saturated; callers
    /// should fall back to `BackupStore::delete_txn_dir` synchronously.
    pub fn push(&self, txn_id: u64, backup_dir: Vec<u8>) -> Result<()> {
        self.queue.push(txn_id, backup_dir)
    }
}

impl Drop for AsyncCleanupWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(queue: Arc<Queue>, shutdown: Arc<AtomicBool>, fsal: Arc<dyn LowerFsal>) {
    let store = BackupStore::new(fsal.as_ref());
    loop {
        let batch = queue.pop_many(64);
        if batch.is_empty() {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(Duration::from_millis(20));
            continue;
        }

        for (txn_id, _dir) in batch {
            if let Err(e) = store.delete_txn_dir(txn_id) {
                warn!(txn_id, error = %e, "async cleanup failed to clear backup dir entries");
                continue;
            }
            debug!(txn_id, "async cleanup removed committed backup dir");
        }
    }
}
