//! Extended directory format
//!
//! Target of micro directory promotion. Entries are kept in an ordered map
//! keyed by (hash, cd) and persisted as a bincode payload after a one-slot
//! header:
//!
//! ```text
//! +0   block type   u64 (BlockType::Header)
//! +8   salt         u64
//! +16  payload len  u64
//! +24  block size   u64 (allocation unit)
//! +64  payload      bincode Vec<record>
//! ```
//!
//! The map sits behind its own mutex, so directory writers only need a
//! shared handle lock to modify an extended directory.

use crate::block::{BlockType, ENTRY_LEN};
use crate::cursor::MAX_CD;
use crate::error::{Result, ZapError};
use crate::index::EntryKey;
use crate::store::{Buffer, ObjectStore, Tx};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const SALT_OFFSET: usize = 8;
const PAYLOAD_LEN_OFFSET: usize = 16;
const BLOCK_SIZE_OFFSET: usize = 24;
const PAYLOAD_OFFSET: usize = ENTRY_LEN;

/// A stored name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedEntry {
    pub name: String,
    /// Integer width in bytes
    pub width: usize,
    pub values: Vec<u64>,
}

impl ExtendedEntry {
    pub fn new(name: &str, width: usize, values: &[u64]) -> Self {
        ExtendedEntry {
            name: name.to_string(),
            width,
            values: values.to_vec(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Record {
    hash: u64,
    cd: u32,
    entry: ExtendedEntry,
}

pub struct ExtendedZap {
    buf: Arc<Buffer>,
    salt: u64,
    block_size: usize,
    entries: Mutex<BTreeMap<EntryKey, ExtendedEntry>>,
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| ZapError::CorruptBlock("truncated extended header".to_string()))
}

impl ExtendedZap {
    /// Start an empty extended directory on `buf`
    ///
    /// Nothing is written until [`ExtendedZap::persist`].
    pub fn new(buf: Arc<Buffer>, salt: u64, block_size: usize) -> Self {
        ExtendedZap {
            buf,
            salt,
            block_size,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn load(buf: Arc<Buffer>) -> Result<Self> {
        let (salt, block_size, records) = {
            let data = buf.read();
            let tag = read_u64(&data, 0)?;
            if tag != BlockType::Header as u64 {
                return Err(ZapError::InvalidBlockType(tag));
            }
            let salt = read_u64(&data, SALT_OFFSET)?;
            let payload_len = read_u64(&data, PAYLOAD_LEN_OFFSET)? as usize;
            let block_size = read_u64(&data, BLOCK_SIZE_OFFSET)? as usize;
            let payload = data
                .get(PAYLOAD_OFFSET..PAYLOAD_OFFSET.saturating_add(payload_len))
                .ok_or_else(|| ZapError::CorruptBlock("extended payload overruns object".to_string()))?;
            let records: Vec<Record> = bincode::deserialize(payload)?;
            (salt, block_size, records)
        };

        if salt == 0 || block_size == 0 {
            return Err(ZapError::CorruptBlock("bad extended header".to_string()));
        }

        let mut entries = BTreeMap::new();
        for record in records {
            if entries
                .insert(EntryKey::new(record.hash, record.cd), record.entry)
                .is_some()
            {
                return Err(ZapError::CorruptBlock(format!(
                    "duplicate (hash, cd) ({:#x}, {})",
                    record.hash, record.cd
                )));
            }
        }

        debug!(
            "Loaded extended directory {} ({} entries)",
            buf.object(),
            entries.len()
        );

        Ok(ExtendedZap {
            buf,
            salt,
            block_size,
            entries: Mutex::new(entries),
        })
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn lookup(&self, hash: u64, name: &str) -> Option<ExtendedEntry> {
        let entries = self.entries.lock();
        Self::find(&entries, hash, name).map(|key| entries[&key].clone())
    }

    /// Insert with a known cd, without persisting
    ///
    /// Used when promoting a micro directory: the entries are unique by
    /// construction, so a collision here is fatal.
    pub fn restore(&self, hash: u64, cd: u32, entry: ExtendedEntry) {
        let previous = self.entries.lock().insert(EntryKey::new(hash, cd), entry);
        assert!(
            previous.is_none(),
            "promotion re-inserted (hash, cd) ({:#x}, {}) twice",
            hash,
            cd
        );
    }

    pub fn add<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        hash: u64,
        entry: ExtendedEntry,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if Self::find(&entries, hash, &entry.name).is_some() {
            return Err(ZapError::AlreadyExists(entry.name));
        }
        let cd = Self::unused_cd(&entries, hash);
        let mut next = entries.clone();
        next.insert(EntryKey::new(hash, cd), entry);
        self.write_out(store, tx, &next)?;
        *entries = next;
        Ok(())
    }

    /// Replace the value of `entry.name`, adding it if absent
    pub fn update<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        hash: u64,
        entry: ExtendedEntry,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let key = match Self::find(&entries, hash, &entry.name) {
            Some(key) => key,
            None => EntryKey::new(hash, Self::unused_cd(&entries, hash)),
        };
        let mut next = entries.clone();
        next.insert(key, entry);
        self.write_out(store, tx, &next)?;
        *entries = next;
        Ok(())
    }

    pub fn remove<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        hash: u64,
        name: &str,
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        let key = Self::find(&entries, hash, name)
            .ok_or_else(|| ZapError::NotFound(name.to_string()))?;
        let mut next = entries.clone();
        next.remove(&key);
        self.write_out(store, tx, &next)?;
        *entries = next;
        Ok(())
    }

    /// First entry ordered at or after `key`
    pub fn at_or_after(&self, key: EntryKey) -> Option<(EntryKey, ExtendedEntry)> {
        self.entries
            .lock()
            .range(key..)
            .next()
            .map(|(k, e)| (*k, e.clone()))
    }

    /// Write the whole directory into the object
    pub fn persist<S: ObjectStore + ?Sized>(&self, store: &S, tx: &Tx) -> Result<()> {
        let entries = self.entries.lock();
        self.write_out(store, tx, &entries)
    }

    /// Serialized payload of the current entries
    pub fn encode(&self) -> Result<Vec<u8>> {
        Self::encode_entries(&self.entries.lock())
    }

    /// Size the object to exactly fit `payload` (at least `min_size`
    /// bytes, in block-size multiples) and write it out
    ///
    /// Resizing is the only step that can fail; the object is untouched
    /// when it does.
    pub fn install<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        payload: &[u8],
        min_size: usize,
    ) -> Result<()> {
        let needed = PAYLOAD_OFFSET + payload.len();
        let new_size = (needed.div_ceil(self.block_size) * self.block_size).max(min_size);
        store.resize(self.buf.object(), new_size, tx)?;
        self.write_payload(store, tx, payload);
        Ok(())
    }

    fn find(entries: &BTreeMap<EntryKey, ExtendedEntry>, hash: u64, name: &str) -> Option<EntryKey> {
        entries
            .range(EntryKey::new(hash, 0)..)
            .take_while(|(key, _)| key.hash == hash)
            .find(|(_, entry)| entry.name == name)
            .map(|(key, _)| *key)
    }

    fn unused_cd(entries: &BTreeMap<EntryKey, ExtendedEntry>, hash: u64) -> u32 {
        let mut cd = 0;
        for (key, _) in entries
            .range(EntryKey::new(hash, 0)..)
            .take_while(|(key, _)| key.hash == hash)
        {
            if key.cd != cd {
                break;
            }
            cd += 1;
        }
        assert!(cd < MAX_CD, "collision chain exhausted for hash {:#x}", hash);
        cd
    }

    fn encode_entries(entries: &BTreeMap<EntryKey, ExtendedEntry>) -> Result<Vec<u8>> {
        let records: Vec<Record> = entries
            .iter()
            .map(|(key, entry)| Record {
                hash: key.hash,
                cd: key.cd,
                entry: entry.clone(),
            })
            .collect();
        Ok(bincode::serialize(&records)?)
    }

    fn write_out<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        tx: &Tx,
        entries: &BTreeMap<EntryKey, ExtendedEntry>,
    ) -> Result<()> {
        let payload = Self::encode_entries(entries)?;

        let needed = PAYLOAD_OFFSET + payload.len();
        let current = self.buf.size();
        if needed > current {
            let new_size = needed.div_ceil(self.block_size) * self.block_size;
            store.resize(self.buf.object(), new_size, tx)?;
            debug!(
                "Grew extended directory {} to {} bytes",
                self.buf.object(),
                new_size
            );
        }

        self.write_payload(store, tx, &payload);
        Ok(())
    }

    /// The object must already hold `PAYLOAD_OFFSET + payload.len()` bytes
    fn write_payload<S: ObjectStore + ?Sized>(&self, store: &S, tx: &Tx, payload: &[u8]) {
        let needed = PAYLOAD_OFFSET + payload.len();
        store.mark_dirty(&self.buf, tx);
        let mut data = self.buf.write(tx);
        data[..PAYLOAD_OFFSET].fill(0);
        data[0..8].copy_from_slice(&(BlockType::Header as u64).to_le_bytes());
        data[SALT_OFFSET..SALT_OFFSET + 8].copy_from_slice(&self.salt.to_le_bytes());
        data[PAYLOAD_LEN_OFFSET..PAYLOAD_LEN_OFFSET + 8]
            .copy_from_slice(&(payload.len() as u64).to_le_bytes());
        data[BLOCK_SIZE_OFFSET..BLOCK_SIZE_OFFSET + 8]
            .copy_from_slice(&(self.block_size as u64).to_le_bytes());
        data[PAYLOAD_OFFSET..needed].copy_from_slice(payload);
    }
}
