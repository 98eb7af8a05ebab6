//! Directory handle and locking
//!
//! One [`Zap`] exists per open directory object, shared through the store's
//! handle cache. It owns the in-memory form of the directory (micro index or
//! extended map) behind a single reader/writer lock, and is the only place
//! where a micro directory grows or is promoted to the extended format.

use crate::block::{self, BlockType};
use crate::config::ZapConfig;
use crate::error::{Result, ZapError};
use crate::extended::{ExtendedEntry, ExtendedZap};
use crate::hash::{zap_hash, NameHasher};
use crate::micro::MicroZap;
use crate::store::{Buffer, ObjectId, ObjectStore, Tx};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// In-memory representation of a directory
pub enum ZapState {
    Micro(MicroZap),
    Extended(ExtendedZap),
}

impl ZapState {
    pub fn is_micro(&self) -> bool {
        matches!(self, ZapState::Micro(_))
    }

    pub fn count(&self) -> usize {
        match self {
            ZapState::Micro(micro) => micro.num_entries(),
            ZapState::Extended(ext) => ext.count(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

/// Proof of the lock actually held on a directory
///
/// A writer asking for `shared_if_extended` may come back with `Read`; only
/// the `Write` variant hands out mutable state.
pub enum DirLock<'a> {
    Read(RwLockReadGuard<'a, ZapState>),
    Write(RwLockWriteGuard<'a, ZapState>),
}

impl<'a> DirLock<'a> {
    pub fn state(&self) -> &ZapState {
        match self {
            DirLock::Read(guard) => &**guard,
            DirLock::Write(guard) => &**guard,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, DirLock::Write(_))
    }

    pub fn is_micro(&self) -> bool {
        self.state().is_micro()
    }

    /// Mutable micro state; `None` under a shared lock or once extended
    pub fn micro_mut(&mut self) -> Option<&mut MicroZap> {
        match self {
            DirLock::Write(guard) => match &mut **guard {
                ZapState::Micro(micro) => Some(micro),
                ZapState::Extended(_) => None,
            },
            DirLock::Read(_) => None,
        }
    }

    pub fn micro(&self) -> Option<&MicroZap> {
        match self.state() {
            ZapState::Micro(micro) => Some(micro),
            ZapState::Extended(_) => None,
        }
    }

    pub fn extended(&self) -> Option<&ExtendedZap> {
        match self.state() {
            ZapState::Extended(ext) => Some(ext),
            ZapState::Micro(_) => None,
        }
    }
}

pub struct Zap {
    object: ObjectId,
    buf: Arc<Buffer>,
    hasher: Arc<dyn NameHasher>,
    salt: u64,
    state: RwLock<ZapState>,
}

impl Zap {
    /// Build a handle from the object's current bytes
    ///
    /// A micro block written in the other byte order is converted in place
    /// first.
    pub fn load(buf: Arc<Buffer>, hasher: Arc<dyn NameHasher>) -> Result<Self> {
        let object = buf.object();
        let (block_type, swapped) = BlockType::detect(&buf.read())?;

        if swapped {
            if block_type != BlockType::Micro {
                return Err(ZapError::CorruptBlock(format!(
                    "object {} is a {:?} block in foreign byte order",
                    object, block_type
                )));
            }
            warn!("Object {} written in foreign byte order, converting", object);
            block::byteswap_micro(&mut buf.write_untracked());
        }

        let state = match block_type {
            BlockType::Micro => ZapState::Micro(MicroZap::load(buf.clone(), hasher.clone())?),
            BlockType::Header => ZapState::Extended(ExtendedZap::load(buf.clone())?),
            BlockType::Leaf => return Err(ZapError::InvalidBlockType(BlockType::Leaf as u64)),
        };
        let salt = match &state {
            ZapState::Micro(micro) => micro.salt(),
            ZapState::Extended(ext) => ext.salt(),
        };

        debug!("Opened directory handle for object {}", object);
        Ok(Zap {
            object,
            buf,
            hasher,
            salt,
            state: RwLock::new(state),
        })
    }

    /// Reuse the handle attached to `object`, or load and attach one
    pub fn acquire<S: ObjectStore + ?Sized>(
        store: &S,
        object: ObjectId,
        hasher: Arc<dyn NameHasher>,
    ) -> Result<Arc<Zap>> {
        store
            .handles()
            .get_or_load(object, || Zap::load(store.hold(object)?, hasher))
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Current size of the backing object
    pub fn block_size(&self) -> usize {
        self.buf.size()
    }

    pub fn hash(&self, name: &str) -> u64 {
        zap_hash(&*self.hasher, self.salt, name)
    }

    /// Lock the directory
    ///
    /// Writers always lock exclusively first and then look at the format:
    /// the format only ever moves from micro to extended, so the check made
    /// under the lock is final. An extended directory needs only a shared
    /// lock to be modified, so with `shared_if_extended` the writer lock is
    /// downgraded. With `adding`, a full micro directory is grown or
    /// promoted before the lock is returned.
    pub fn lockdir<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: Option<&Tx>,
        mode: LockMode,
        shared_if_extended: bool,
        adding: bool,
        config: &ZapConfig,
    ) -> Result<DirLock<'_>> {
        if mode == LockMode::Read {
            return Ok(DirLock::Read(self.state.read()));
        }

        let mut guard = self.state.write();
        if guard.is_micro() {
            if let Some(tx) = tx {
                store.mark_dirty(&self.buf, tx);
            }
            if adding {
                let tx = tx.ok_or_else(|| {
                    ZapError::InvalidArgument("adding to a directory requires a transaction".to_string())
                })?;
                self.make_room(store, tx, &mut guard, config)?;
            }
        }

        if shared_if_extended && !guard.is_micro() {
            return Ok(DirLock::Read(RwLockWriteGuard::downgrade(guard)));
        }
        Ok(DirLock::Write(guard))
    }

    /// Promote a micro directory held under the writer lock
    pub fn promote<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        lock: &mut DirLock<'_>,
        config: &ZapConfig,
    ) -> Result<()> {
        let DirLock::Write(guard) = lock else {
            panic!("promoting directory {} without the writer lock", self.object);
        };
        self.promote_state(store, tx, guard, config)
    }

    /// Ensure a full micro directory has a free slot
    fn make_room<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        state: &mut ZapState,
        config: &ZapConfig,
    ) -> Result<()> {
        let ZapState::Micro(micro) = state else {
            return Ok(());
        };
        if !micro.is_full() {
            return Ok(());
        }

        let new_size = self.buf.size() * 2;
        if new_size <= config.micro_max_block_size {
            store.resize(self.object, new_size, tx)?;
            micro.grow(new_size);
            info!(
                "Grew micro directory {} to {} bytes ({} slots)",
                self.object,
                new_size,
                micro.num_chunks()
            );
            return Ok(());
        }

        self.promote_state(store, tx, state, config)
    }

    fn promote_state<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        state: &mut ZapState,
        config: &ZapConfig,
    ) -> Result<()> {
        let ZapState::Micro(micro) = state else {
            return Ok(());
        };

        let entries = micro.snapshot();
        let ext = ExtendedZap::new(self.buf.clone(), self.salt, config.extended_block_size);
        for (hash, entry) in &entries {
            ext.restore(*hash, entry.cd, ExtendedEntry::new(&entry.name, 8, &[entry.value]));
        }

        // The micro block stays intact unless the extended form is written
        let payload = ext.encode()?;
        ext.install(store, tx, &payload, config.extended_block_size)?;
        // Dropping the micro state tears down its index
        *state = ZapState::Extended(ext);

        info!(
            "Promoted directory {} to extended format ({} entries)",
            self.object,
            entries.len()
        );
        Ok(())
    }
}

impl Drop for Zap {
    fn drop(&mut self) {
        debug!("Releasing directory handle for object {}", self.object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Crc64Hasher;
    use crate::store::failing::FailingResize;
    use crate::store::MemStore;

    fn small_config() -> ZapConfig {
        ZapConfig {
            initial_block_size: 256,
            micro_max_block_size: 512,
            extended_block_size: 1024,
            handle_cache_capacity: 8,
        }
    }

    fn new_dir(store: &MemStore, tx: &Tx, size: usize) -> Arc<Zap> {
        let id = store.allocate(size, tx).unwrap();
        let buf = store.hold(id).unwrap();
        block::format_micro(&mut buf.write(tx), 0x2468);
        Zap::acquire(store, id, Arc::new(Crc64Hasher)).unwrap()
    }

    fn fill<S: ObjectStore>(zap: &Zap, store: &S, tx: &Tx, config: &ZapConfig, names: std::ops::Range<u64>) {
        for i in names {
            let name = format!("entry-{}", i);
            let hash = zap.hash(&name);
            let mut lock = zap
                .lockdir(store, Some(tx), LockMode::Write, false, true, config)
                .unwrap();
            lock.micro_mut().unwrap().insert(tx, &name, hash, i);
        }
    }

    #[test]
    fn test_acquire_reuses_cached_handle() {
        let store = MemStore::new(&ZapConfig::default());
        let tx = store.begin();
        let first = new_dir(&store, &tx, 512);
        let second = Zap::acquire(&store, first.object(), Arc::new(Crc64Hasher)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_read_lock_is_shared() {
        let store = MemStore::new(&ZapConfig::default());
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 512);
        let config = ZapConfig::default();

        let a = zap.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
        let b = zap.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
        assert!(!a.is_write() && !b.is_write());
        assert!(a.micro().is_some());
    }

    #[test]
    fn test_micro_writer_keeps_exclusive_lock() {
        let store = MemStore::new(&ZapConfig::default());
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 512);
        store.commit(tx).unwrap();

        let tx = store.begin();
        let lock = zap
            .lockdir(&store, Some(&tx), LockMode::Write, true, false, &ZapConfig::default())
            .unwrap();
        assert!(lock.is_write());
        assert!(store.hold(zap.object()).unwrap().is_dirty());
    }

    #[test]
    fn test_full_block_grows_in_place() {
        let config = small_config();
        let store = MemStore::new(&config);
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 256);

        fill(&zap, &store, &tx, &config, 0..3);
        assert_eq!(zap.block_size(), 256);

        fill(&zap, &store, &tx, &config, 3..4);
        assert_eq!(zap.block_size(), 512);
        let lock = zap.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
        assert_eq!(lock.micro().unwrap().num_chunks(), 7);
        assert_eq!(lock.state().count(), 4);
    }

    #[test]
    fn test_full_block_at_max_promotes() {
        let config = small_config();
        let store = MemStore::new(&config);
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 256);
        fill(&zap, &store, &tx, &config, 0..7);

        // Block is full at the maximum micro size
        let lock = zap
            .lockdir(&store, Some(&tx), LockMode::Write, true, true, &config)
            .unwrap();
        assert!(!lock.is_write(), "extended writer should be downgraded");
        let ext = lock.extended().unwrap();
        assert_eq!(ext.count(), 7);
        assert_eq!(ext.salt(), 0x2468);
        for i in 0..7u64 {
            let name = format!("entry-{}", i);
            assert_eq!(ext.lookup(zap.hash(&name), &name).unwrap().values, vec![i]);
        }
        drop(lock);

        // The promoted object reloads as extended
        let reloaded = Zap::load(store.hold(zap.object()).unwrap(), Arc::new(Crc64Hasher)).unwrap();
        let lock = reloaded.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
        assert_eq!(lock.state().count(), 7);
    }

    #[test]
    fn test_failed_promotion_keeps_micro_block() {
        let config = small_config();
        let store = FailingResize::new(MemStore::new(&config));
        let tx = store.inner().begin();
        let id = store.allocate(512, &tx).unwrap();
        block::format_micro(&mut store.hold(id).unwrap().write(&tx), 0x2468);
        let zap = Zap::acquire(&store, id, Arc::new(Crc64Hasher)).unwrap();
        fill(&zap, &store, &tx, &config, 0..7);
        let before = store.hold(id).unwrap().read().clone();

        store.fail_resize(true);
        assert!(zap
            .lockdir(&store, Some(&tx), LockMode::Write, true, true, &config)
            .is_err());

        // Still a full micro directory, in memory and on disk
        assert_eq!(*store.hold(id).unwrap().read(), before);
        {
            let lock = zap.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
            assert_eq!(lock.micro().unwrap().num_entries(), 7);
        }
        let reloaded = Zap::load(store.hold(id).unwrap(), Arc::new(Crc64Hasher)).unwrap();
        assert_eq!(reloaded.state.read().count(), 7);

        store.fail_resize(false);
        let lock = zap
            .lockdir(&store, Some(&tx), LockMode::Write, true, true, &config)
            .unwrap();
        assert_eq!(lock.extended().unwrap().count(), 7);
    }

    #[test]
    fn test_explicit_promote_keeps_cds() {
        let config = small_config();
        let store = MemStore::new(&config);
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 512);
        fill(&zap, &store, &tx, &config, 0..3);

        let before: Vec<_> = {
            let lock = zap.lockdir(&store, None, LockMode::Read, false, false, &config).unwrap();
            lock.micro().unwrap().iter().map(|n| n.key()).collect()
        };

        let mut lock = zap
            .lockdir(&store, Some(&tx), LockMode::Write, false, false, &config)
            .unwrap();
        zap.promote(&store, &tx, &mut lock, &config).unwrap();
        let ext = lock.extended().unwrap();
        let mut after = Vec::new();
        let mut key = crate::index::EntryKey::new(0, 0);
        while let Some((found, _)) = ext.at_or_after(key) {
            after.push(found);
            key = crate::index::EntryKey::new(found.hash, found.cd + 1);
        }
        assert_eq!(before, after);
    }

    #[test]
    fn test_adding_without_tx_rejected() {
        let store = MemStore::new(&ZapConfig::default());
        let tx = store.begin();
        let zap = new_dir(&store, &tx, 512);
        assert!(matches!(
            zap.lockdir(&store, None, LockMode::Write, false, true, &ZapConfig::default()),
            Err(ZapError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_load_converts_foreign_byte_order() {
        let mut data = vec![0u8; 512];
        block::format_micro(&mut data, 0x77);
        let name = "swapped";
        block::MicroEntry::new(name, 0x0102_0304, 0).write(&mut data, 4);
        block::byteswap_micro(&mut data);

        let zap = Zap::load(Arc::new(Buffer::new(9, data)), Arc::new(Crc64Hasher)).unwrap();
        assert_eq!(zap.salt(), 0x77);
        let lock = zap.state.read();
        let ZapState::Micro(micro) = &*lock else {
            panic!("expected micro");
        };
        assert_eq!(micro.find(zap.hash(name), name).unwrap().entry.value, 0x0102_0304);
    }

    #[test]
    fn test_load_rejects_unknown_tag() {
        let buf = Arc::new(Buffer::new(3, vec![0xEE; 512]));
        assert!(matches!(
            Zap::load(buf, Arc::new(Crc64Hasher)),
            Err(ZapError::InvalidBlockType(_))
        ));
    }
}
