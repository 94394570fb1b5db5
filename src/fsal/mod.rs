// src/fsal/mod.rs

//! The narrow verb set this core consumes from the lower FSAL (spec §6).
//!
//! NFSv4 wire decoding, session/export management, and the lower
//! filesystem's own implementation are all out of scope; this module only
//! defines the trait boundary the coordinator, backup store, and undo
//! executor call through, plus an in-memory fake used by the crate's own
//! tests (a real lower FSAL is itself out of scope).

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    RegularFile,
    Directory,
    Symlink,
    /// Sockets, char/block devices: backed up as a noop (spec §4.D).
    Other,
}

/// The narrow verb set the coordinator, backup store, and undo executor
/// drive the lower filesystem through. Handles are opaque byte strings
/// native to the lower FSAL; this crate never interprets their contents.
pub trait LowerFsal: Send + Sync {
    fn root_handle(&self) -> Vec<u8>;

    /// Resolves a full export-relative path component by component from the
    /// root (spec §6 `lookup_path`). Used by crash recovery, which only has
    /// the transaction log's `backup_dir_path` to go on.
    fn lookup_path(&self, path: &Path) -> Result<Vec<u8>> {
        let mut current = self.root_handle();
        for component in path.components() {
            let name = component.as_os_str().to_string_lossy();
            current = self
                .lookup(&current, &name)?
                .ok_or_else(|| Error::InvalidPath(format!("no such path: {}", path.display())))?;
        }
        Ok(current)
    }

    fn lookup(&self, parent: &[u8], name: &str) -> Result<Option<Vec<u8>>>;

    fn kind(&self, handle: &[u8]) -> Result<ObjectKind>;

    fn size(&self, handle: &[u8]) -> Result<u64>;

    fn create(
        &self,
        parent: &[u8],
        name: &str,
        kind: ObjectKind,
        symlink_target: Option<&Path>,
    ) -> Result<Vec<u8>>;

    fn mkdir(&self, parent: &[u8], name: &str) -> Result<Vec<u8>>;

    /// Hard link: creates `name` under `parent` pointing at the same object
    /// as `existing` (spec §6 `link`).
    fn link(&self, existing: &[u8], parent: &[u8], name: &str) -> Result<()>;

    fn unlink(&self, parent: &[u8], name: &str) -> Result<()>;

    fn rename(&self, src_parent: &[u8], src_name: &str, dst_parent: &[u8], dst_name: &str) -> Result<()>;

    fn readlink(&self, handle: &[u8]) -> Result<PathBuf>;

    fn read(&self, handle: &[u8], offset: u64, len: usize) -> Result<Vec<u8>>;

    fn write(&self, handle: &[u8], offset: u64, data: &[u8]) -> Result<usize>;

    fn truncate(&self, handle: &[u8], size: u64) -> Result<()>;

    /// Copy-on-write clone. Returns `Ok(false)` (not an error) when the
    /// lower FSAL doesn't support cloning, so callers fall back to
    /// `copy_range` (spec §4.D).
    fn clone_range(&self, src: &[u8], src_offset: u64, dst: &[u8], dst_offset: u64, len: u64) -> Result<bool>;

    fn copy_range(&self, src: &[u8], src_offset: u64, dst: &[u8], dst_offset: u64, len: u64) -> Result<u64>;

    fn readdir(&self, handle: &[u8]) -> Result<Vec<String>>;
}
