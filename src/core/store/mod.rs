//! Object store seam
//!
//! The directory engine never touches storage directly. It holds buffers,
//! marks them dirty inside a transaction, resizes objects and caches its
//! in-memory handles through the [`ObjectStore`] trait.

pub mod cache;
pub mod mem;

pub use cache::HandleCache;
pub use mem::MemStore;

use crate::error::Result;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a storage object
pub type ObjectId = u64;

/// Reference to the raw bytes of one storage object
///
/// Buffers are shared through `Arc`; dropping the last clone releases the
/// hold.
#[derive(Debug)]
pub struct Buffer {
    object: ObjectId,
    data: RwLock<Vec<u8>>,
    /// Transaction group that last dirtied this buffer (0 = clean)
    dirty_txg: AtomicU64,
}

impl Buffer {
    pub fn new(object: ObjectId, data: Vec<u8>) -> Self {
        Buffer {
            object,
            data: RwLock::new(data),
            dirty_txg: AtomicU64::new(0),
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn size(&self) -> usize {
        self.data.read().len()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read()
    }

    /// Mutable access to the bytes
    ///
    /// The buffer must have been marked dirty in the current transaction.
    pub fn write(&self, tx: &Tx) -> RwLockWriteGuard<'_, Vec<u8>> {
        debug_assert_eq!(
            self.dirty_txg.load(Ordering::Acquire),
            tx.txg(),
            "buffer {} written without being dirtied",
            self.object
        );
        self.data.write()
    }

    /// Mutable access outside any transaction, for load-time fixups
    /// (byte-order conversion) that do not change the logical contents.
    pub(crate) fn write_untracked(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_txg.load(Ordering::Acquire) != 0
    }

    pub(crate) fn set_dirty(&self, txg: u64) {
        self.dirty_txg.store(txg, Ordering::Release);
    }

    /// Mark clean, unless a later transaction dirtied it since
    pub(crate) fn clear_dirty(&self, txg: u64) {
        let _ = self
            .dirty_txg
            .compare_exchange(txg, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// An open transaction
#[derive(Debug)]
pub struct Tx {
    txg: u64,
    dirty: Mutex<BTreeSet<ObjectId>>,
}

impl Tx {
    pub fn new(txg: u64) -> Self {
        assert_ne!(txg, 0, "transaction group 0 is reserved");
        Tx {
            txg,
            dirty: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn txg(&self) -> u64 {
        self.txg
    }

    /// Objects dirtied so far
    pub fn dirty_objects(&self) -> Vec<ObjectId> {
        self.dirty.lock().iter().copied().collect()
    }

    pub(crate) fn note_dirty(&self, buf: &Buffer) {
        buf.set_dirty(self.txg);
        self.dirty.lock().insert(buf.object());
    }
}

/// Storage consumed by the directory engine
pub trait ObjectStore: Send + Sync {
    /// Take a reference to an object's backing bytes
    fn hold(&self, object: ObjectId) -> Result<std::sync::Arc<Buffer>>;

    /// Create a zero-filled object of `size` bytes at a fresh id
    fn allocate(&self, size: usize, tx: &Tx) -> Result<ObjectId>;

    /// Create a zero-filled object of `size` bytes at a chosen id
    fn claim(&self, object: ObjectId, size: usize, tx: &Tx) -> Result<()>;

    /// Free an object and evict any handle attached to it
    fn free(&self, object: ObjectId, tx: &Tx) -> Result<()>;

    /// Set an object's size, zero-filling on growth
    fn resize(&self, object: ObjectId, new_size: usize, tx: &Tx) -> Result<()>;

    /// Must be called before mutating a buffer's bytes
    fn mark_dirty(&self, buf: &Buffer, tx: &Tx) {
        tx.note_dirty(buf);
    }

    /// Cache of directory handles attached to objects
    fn handles(&self) -> &HandleCache;
}
