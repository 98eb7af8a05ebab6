//! Public directory operations
//!
//! [`ZapDirs`] binds an object store, a configuration and a name hasher.
//! Every call opens the directory through its cached handle, takes the lock
//! the operation needs and dispatches on the directory's current format.

use crate::block::{self, MAX_NAME_LEN};
use crate::config::ZapConfig;
use crate::cursor::{Attribute, Cursor};
use crate::error::{Result, ZapError};
use crate::extended::{ExtendedEntry, ExtendedZap};
use crate::handle::{DirLock, LockMode, Zap};
use crate::hash::{Crc64Hasher, NameHasher};
use crate::index::EntryKey;
use crate::micro::generate_salt;
use crate::store::{ObjectId, ObjectStore, Tx};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// On-disk format of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirFormat {
    Micro,
    Extended,
}

/// Summary of one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZapStats {
    pub object: ObjectId,
    pub format: DirFormat,
    /// Size of the backing object in bytes
    pub block_size: usize,
    pub num_entries: usize,
    /// Slot capacity; micro directories only
    pub num_slots: Option<usize>,
    pub salt: u64,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(ZapError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_width(width: usize) -> Result<()> {
    match width {
        1 | 2 | 4 | 8 => Ok(()),
        _ => Err(ZapError::InvalidArgument(format!(
            "integer width {} not one of 1, 2, 4, 8",
            width
        ))),
    }
}

fn validate_values(width: usize, values: &[u64]) -> Result<()> {
    validate_width(width)?;
    if values.is_empty() {
        return Err(ZapError::InvalidArgument("empty value".to_string()));
    }
    if width < 8 {
        if let Some(v) = values.iter().find(|&&v| v >> (width * 8) != 0) {
            return Err(ZapError::InvalidArgument(format!(
                "value {:#x} does not fit in {} bytes",
                v, width
            )));
        }
    }
    Ok(())
}

/// True if the micro format can hold this entry
fn fits_micro(name: &str, width: usize, count: usize) -> bool {
    width == 8 && count == 1 && name.len() <= MAX_NAME_LEN
}

fn type_mismatch(name: &str, width: usize, count: usize) -> ZapError {
    ZapError::TypeMismatch {
        name: name.to_string(),
        width,
        count,
    }
}

pub struct ZapDirs<S: ObjectStore> {
    store: Arc<S>,
    config: ZapConfig,
    hasher: Arc<dyn NameHasher>,
}

impl<S: ObjectStore> ZapDirs<S> {
    pub fn new(store: Arc<S>, config: ZapConfig) -> Result<Self> {
        Self::with_hasher(store, config, Arc::new(Crc64Hasher))
    }

    pub fn with_hasher(store: Arc<S>, config: ZapConfig, hasher: Arc<dyn NameHasher>) -> Result<Self> {
        config.validate()?;
        Ok(ZapDirs {
            store,
            config,
            hasher,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ZapConfig {
        &self.config
    }

    /// Open (or reuse) the handle of directory `object`
    pub fn open(&self, object: ObjectId) -> Result<Arc<Zap>> {
        Zap::acquire(&*self.store, object, self.hasher.clone())
    }

    fn write_lock<'z>(
        &self,
        zap: &'z Zap,
        tx: &Tx,
        adding: bool,
    ) -> Result<DirLock<'z>> {
        zap.lockdir(&*self.store, Some(tx), LockMode::Write, true, adding, &self.config)
    }

    fn read_lock<'z>(&self, zap: &'z Zap) -> Result<DirLock<'z>> {
        zap.lockdir(&*self.store, None, LockMode::Read, false, false, &self.config)
    }

    /// Create an empty micro directory in a new object
    pub fn create(&self, tx: &Tx) -> Result<ObjectId> {
        let object = self.store.allocate(self.config.initial_block_size, tx)?;
        self.format(object, tx)?;
        info!("Created directory {}", object);
        Ok(object)
    }

    /// Create an empty micro directory at a chosen object id
    pub fn create_claim(&self, object: ObjectId, tx: &Tx) -> Result<()> {
        self.store.claim(object, self.config.initial_block_size, tx)?;
        self.format(object, tx)?;
        info!("Created directory {} (claimed)", object);
        Ok(())
    }

    fn format(&self, object: ObjectId, tx: &Tx) -> Result<()> {
        let buf = self.store.hold(object)?;
        self.store.mark_dirty(&buf, tx);
        block::format_micro(&mut buf.write(tx), generate_salt(object));
        Ok(())
    }

    /// Free a directory object and drop its handle
    pub fn destroy(&self, object: ObjectId, tx: &Tx) -> Result<()> {
        self.store.free(object, tx)?;
        info!("Destroyed directory {}", object);
        Ok(())
    }

    /// Look up `name`, expecting `count` integers of `width` bytes
    pub fn lookup(&self, object: ObjectId, name: &str, width: usize, count: usize) -> Result<Vec<u64>> {
        validate_name(name)?;
        validate_width(width)?;
        let zap = self.open(object)?;
        let hash = zap.hash(name);
        let lock = self.read_lock(&zap)?;

        if let Some(micro) = lock.micro() {
            if name.len() > MAX_NAME_LEN {
                return Err(ZapError::NotFound(name.to_string()));
            }
            let node = micro
                .find(hash, name)
                .ok_or_else(|| ZapError::NotFound(name.to_string()))?;
            if width != 8 || count != 1 {
                return Err(type_mismatch(name, 8, 1));
            }
            return Ok(vec![node.entry.value]);
        }

        let entry = Self::extended_of(&lock)
            .lookup(hash, name)
            .ok_or_else(|| ZapError::NotFound(name.to_string()))?;
        if entry.width != width || entry.values.len() != count {
            return Err(type_mismatch(name, entry.width, entry.values.len()));
        }
        Ok(entry.values)
    }

    pub fn lookup_u64(&self, object: ObjectId, name: &str) -> Result<u64> {
        let values = self.lookup(object, name, 8, 1)?;
        Ok(values[0])
    }

    pub fn contains(&self, object: ObjectId, name: &str) -> Result<bool> {
        match self.length(object, name) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stored integer width and count of `name`
    pub fn length(&self, object: ObjectId, name: &str) -> Result<(usize, usize)> {
        validate_name(name)?;
        let zap = self.open(object)?;
        let hash = zap.hash(name);
        let lock = self.read_lock(&zap)?;

        if let Some(micro) = lock.micro() {
            if name.len() <= MAX_NAME_LEN && micro.find(hash, name).is_some() {
                return Ok((8, 1));
            }
            return Err(ZapError::NotFound(name.to_string()));
        }

        Self::extended_of(&lock)
            .lookup(hash, name)
            .map(|entry| (entry.width, entry.values.len()))
            .ok_or_else(|| ZapError::NotFound(name.to_string()))
    }

    /// Add `name`; fails with `AlreadyExists` if present
    pub fn add(&self, object: ObjectId, name: &str, width: usize, values: &[u64], tx: &Tx) -> Result<()> {
        validate_name(name)?;
        validate_values(width, values)?;
        let zap = self.open(object)?;
        let hash = zap.hash(name);
        let mut lock = self.write_lock(&zap, tx, true)?;

        if let Some(micro) = lock.micro_mut() {
            if fits_micro(name, width, values.len()) {
                if micro.find(hash, name).is_some() {
                    return Err(ZapError::AlreadyExists(name.to_string()));
                }
                micro.insert(tx, name, hash, values[0]);
                return Ok(());
            }
        }
        if lock.is_micro() {
            debug!("Entry '{}' does not fit micro directory {}", name, object);
            zap.promote(&*self.store, tx, &mut lock, &self.config)?;
        }

        Self::extended_of(&lock).add(&*self.store, tx, hash, ExtendedEntry::new(name, width, values))
    }

    pub fn add_u64(&self, object: ObjectId, name: &str, value: u64, tx: &Tx) -> Result<()> {
        self.add(object, name, 8, &[value], tx)
    }

    /// Set `name` to `values`, adding it if absent
    pub fn update(&self, object: ObjectId, name: &str, width: usize, values: &[u64], tx: &Tx) -> Result<()> {
        validate_name(name)?;
        validate_values(width, values)?;
        let zap = self.open(object)?;
        let hash = zap.hash(name);
        let mut lock = self.write_lock(&zap, tx, true)?;

        if let Some(micro) = lock.micro_mut() {
            if fits_micro(name, width, values.len()) {
                match micro.find(hash, name).map(|node| node.key()) {
                    Some(key) => {
                        micro.update_value(tx, key, values[0]);
                    }
                    None => micro.insert(tx, name, hash, values[0]),
                }
                return Ok(());
            }
        }
        if lock.is_micro() {
            debug!("Entry '{}' does not fit micro directory {}", name, object);
            zap.promote(&*self.store, tx, &mut lock, &self.config)?;
        }

        Self::extended_of(&lock).update(&*self.store, tx, hash, ExtendedEntry::new(name, width, values))
    }

    pub fn update_u64(&self, object: ObjectId, name: &str, value: u64, tx: &Tx) -> Result<()> {
        self.update(object, name, 8, &[value], tx)
    }

    pub fn remove(&self, object: ObjectId, name: &str, tx: &Tx) -> Result<()> {
        validate_name(name)?;
        let zap = self.open(object)?;
        let hash = zap.hash(name);
        let mut lock = self.write_lock(&zap, tx, false)?;

        if let Some(micro) = lock.micro_mut() {
            let key = micro
                .find(hash, name)
                .map(|node| node.key())
                .ok_or_else(|| ZapError::NotFound(name.to_string()))?;
            micro.remove(tx, key);
            return Ok(());
        }

        Self::extended_of(&lock).remove(&*self.store, tx, hash, name)
    }

    pub fn count(&self, object: ObjectId) -> Result<usize> {
        let zap = self.open(object)?;
        let lock = self.read_lock(&zap)?;
        Ok(lock.state().count())
    }

    pub fn stats(&self, object: ObjectId) -> Result<ZapStats> {
        let zap = self.open(object)?;
        let lock = self.read_lock(&zap)?;
        let (format, num_slots) = match lock.micro() {
            Some(micro) => (DirFormat::Micro, Some(micro.num_chunks())),
            None => (DirFormat::Extended, None),
        };
        Ok(ZapStats {
            object,
            format,
            block_size: zap.block_size(),
            num_entries: lock.state().count(),
            num_slots,
            salt: zap.salt(),
        })
    }

    /// Add an entry named by the hex form of `value`, holding `value`
    pub fn add_int(&self, object: ObjectId, value: u64, tx: &Tx) -> Result<()> {
        self.add_u64(object, &format!("{:x}", value), value, tx)
    }

    /// Check that `value` was added with [`ZapDirs::add_int`]
    pub fn lookup_int(&self, object: ObjectId, value: u64) -> Result<()> {
        self.lookup_u64(object, &format!("{:x}", value)).map(|_| ())
    }

    pub fn remove_int(&self, object: ObjectId, value: u64, tx: &Tx) -> Result<()> {
        self.remove(object, &format!("{:x}", value), tx)
    }

    /// Name of the first entry whose first integer, masked, equals `value`
    ///
    /// A zero `mask` compares every bit.
    pub fn value_search(&self, object: ObjectId, value: u64, mask: u64) -> Result<String> {
        let mask = if mask == 0 { u64::MAX } else { mask };
        for attr in self.entries(object) {
            let attr = attr?;
            if attr.first_integer & mask == value {
                return Ok(attr.name);
            }
        }
        Err(ZapError::NotFound(format!("value {:#x}", value)))
    }

    /// Copy every entry of `from` into `into`
    pub fn join(&self, from: ObjectId, into: ObjectId, tx: &Tx) -> Result<usize> {
        let mut copied = 0;
        for attr in self.entries(from) {
            let attr = attr?;
            let values = self.lookup(from, &attr.name, attr.integer_length, attr.num_integers)?;
            self.add(into, &attr.name, attr.integer_length, &values, tx)?;
            copied += 1;
        }
        debug!("Joined {} entries from directory {} into {}", copied, from, into);
        Ok(copied)
    }

    pub fn cursor_init(&self, object: ObjectId, serialized: u64) -> Cursor {
        Cursor::init(object, serialized)
    }

    /// Entry at or after the cursor position; `None` at the end
    ///
    /// The directory lock is only held for the duration of the call.
    pub fn cursor_retrieve(&self, cursor: &mut Cursor) -> Result<Option<Attribute>> {
        if cursor.is_exhausted() {
            return Ok(None);
        }
        let zap = self.open(cursor.object())?;
        let lock = self.read_lock(&zap)?;
        let key = EntryKey::new(cursor.hash(), cursor.cd());

        let found = match lock.micro() {
            Some(micro) => micro.at_or_after(key).map(|node| {
                (
                    node.key(),
                    Attribute {
                        name: node.entry.name.clone(),
                        integer_length: 8,
                        num_integers: 1,
                        first_integer: node.entry.value,
                    },
                )
            }),
            None => Self::extended_of(&lock).at_or_after(key).map(|(key, entry)| {
                let attr = Attribute {
                    first_integer: entry.values.first().copied().unwrap_or(0),
                    integer_length: entry.width,
                    num_integers: entry.values.len(),
                    name: entry.name,
                };
                (key, attr)
            }),
        };

        match found {
            Some((key, attr)) => {
                cursor.position(key.hash, key.cd);
                Ok(Some(attr))
            }
            None => {
                cursor.exhaust();
                Ok(None)
            }
        }
    }

    pub fn cursor_advance(&self, cursor: &mut Cursor) {
        cursor.advance();
    }

    pub fn cursor_serialize(&self, cursor: &Cursor) -> u64 {
        cursor.serialize()
    }

    /// Iterate every entry of `object` in (hash, cd) order
    pub fn entries(&self, object: ObjectId) -> Entries<'_, S> {
        Entries {
            dirs: self,
            cursor: Cursor::init(object, 0),
            failed: false,
        }
    }

    fn extended_of<'l>(lock: &'l DirLock<'_>) -> &'l ExtendedZap {
        match lock.extended() {
            Some(ext) => ext,
            None => unreachable!("directory is neither micro nor extended"),
        }
    }
}

/// Cursor-driven iterator over one directory
pub struct Entries<'a, S: ObjectStore> {
    dirs: &'a ZapDirs<S>,
    cursor: Cursor,
    failed: bool,
}

impl<'a, S: ObjectStore> Entries<'a, S> {
    /// Serialized position of the next entry
    pub fn position(&self) -> u64 {
        self.cursor.serialize()
    }
}

impl<'a, S: ObjectStore> Iterator for Entries<'a, S> {
    type Item = Result<Attribute>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.dirs.cursor_retrieve(&mut self.cursor) {
            Ok(Some(attr)) => {
                self.cursor.advance();
                Some(Ok(attr))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
