// src/ids.rs

//! The stable, opaque 128-bit object identifier exposed to clients as the
//! wire handle, and the monotonic, window-reserving allocator that mints
//! them (spec §3, §4.B, id_manager.cpp).

use crate::error::{Error, Result};
use crate::kv::{KvStore, NEXT_UUID_KEY};
use std::sync::Mutex;

/// UUIDs below this value are reserved; the root UUID and any other
/// well-known identifiers live in this band.
pub const RESERVED_BELOW: u128 = 1u128 << 64;

/// The export root's stable identifier: `0x00000000_00000000_00000001_00000000`.
pub const ROOT_UUID: ObjectUuid = ObjectUuid(1u128 << 32);

/// Window size the allocator reserves durably at a time (id_manager.cpp's
/// `KEY_RESERVE_AMOUNT`).
const RESERVE_WINDOW: u128 = 256;

/// First UUID handed out once the reserved band is left behind.
const FIRST_ALLOCATABLE: u128 = RESERVED_BELOW + 1;

/// A 16-byte opaque object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectUuid(u128);

impl ObjectUuid {
    pub fn root() -> Self {
        ROOT_UUID
    }

    pub fn is_root(&self) -> bool {
        *self == ROOT_UUID
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    /// Parse a wire handle of arbitrary length; fails unless exactly 16 bytes.
    pub fn from_wire(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::InvalidPath("wire handle must be 16 bytes".to_string()))?;
        Ok(Self::from_bytes(arr))
    }
}

impl std::fmt::Display for ObjectUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

struct AllocatorState {
    next: u128,
    max_reserved: u128,
}

/// Single-allocator-lock, reservation-batched UUID source (spec §3).
pub struct UuidAllocator {
    kv: KvStore,
    state: Mutex<AllocatorState>,
}

impl UuidAllocator {
    /// Opens the allocator against `kv`, restoring (or initializing) the
    /// persisted high-water mark and eagerly reserving the first window.
    pub fn open(kv: KvStore) -> Result<Self> {
        let persisted = kv.get(NEXT_UUID_KEY)?;
        let next = match persisted {
            Some(bytes) => {
                let arr: [u8; 16] = bytes
                    .try_into()
                    .map_err(|_| Error::storage("__next_uuid__ is not 16 bytes"))?;
                u128::from_be_bytes(arr)
            }
            None => FIRST_ALLOCATABLE,
        };

        let max_reserved = next + RESERVE_WINDOW;
        kv.put_batch([(NEXT_UUID_KEY.to_vec(), max_reserved.to_be_bytes().to_vec())])?;

        Ok(Self {
            kv,
            state: Mutex::new(AllocatorState { next, max_reserved }),
        })
    }

    /// Returns the next UUID, reserving a fresh window durably when the
    /// current one is exhausted (T8).
    pub fn allocate(&self) -> Result<ObjectUuid> {
        let mut state = self.state.lock().unwrap();
        if state.next == state.max_reserved {
            let new_max = state.next + RESERVE_WINDOW;
            self.kv
                .put_batch([(NEXT_UUID_KEY.to_vec(), new_max.to_be_bytes().to_vec())])?;
            state.max_reserved = new_max;
        }
        let allocated = state.next;
        state.next += 1;
        Ok(ObjectUuid(allocated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;

    #[test]
    fn root_uuid_matches_reserved_layout() {
        assert_eq!(ROOT_UUID.to_bytes(), (1u128 << 32).to_be_bytes());
        assert!((1u128 << 32) < RESERVED_BELOW);
    }

    #[test]
    fn allocated_uuids_are_monotonic_and_above_reserved_band() {
        let kv = KvStore::temporary().unwrap();
        let alloc = UuidAllocator::open(kv).unwrap();

        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert!(a < b);
        assert!(a > ObjectUuid(RESERVED_BELOW));
    }

    #[test]
    fn window_boundary_persists_high_water_mark_once() {
        let kv = KvStore::temporary().unwrap();
        let alloc = UuidAllocator::open(kv).unwrap();

        // Exhaust the first window (256 ids) plus one more to force a second
        // reservation (T8).
        for _ in 0..257 {
            alloc.allocate().unwrap();
        }

        let persisted = alloc.kv.get(NEXT_UUID_KEY).unwrap().unwrap();
        let arr: [u8; 16] = persisted.try_into().unwrap();
        let max_reserved = u128::from_be_bytes(arr);
        assert_eq!(max_reserved, FIRST_ALLOCATABLE + RESERVE_WINDOW * 2);
    }

    #[test]
    fn allocator_resumes_from_persisted_high_water_mark() {
        let dir = tempfile::tempdir().unwrap();
        let first = {
            let kv = KvStore::open(dir.path()).unwrap();
            let alloc = UuidAllocator::open(kv).unwrap();
            alloc.allocate().unwrap()
        };

        let kv2 = KvStore::open(dir.path()).unwrap();
        let alloc2 = UuidAllocator::open(kv2).unwrap();
        let second = alloc2.allocate().unwrap();

        assert!(second > first);
    }
}
