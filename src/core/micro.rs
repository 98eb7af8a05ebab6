//! Micro directory operations
//!
//! A micro directory is a single block of fixed-size slots plus the
//! in-memory [`EntryIndex`] that mirrors its live slots. Every mutation
//! writes the block and updates the index in the same call, while the
//! caller holds the handle's writer lock.

use crate::block::{self, MicroEntry, MicroHeader};
use crate::cursor::MAX_CD;
use crate::error::{Result, ZapError};
use crate::hash::{zap_hash, NameHasher};
use crate::index::{EntryIndex, EntryKey, IndexNode};
use crate::store::{Buffer, ObjectId, Tx};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Pick a fresh, non-zero salt for a new directory
pub fn generate_salt(object: ObjectId) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (rand::random::<u64>() ^ nanos ^ (object << 1)) | 1
}

pub struct MicroZap {
    buf: Arc<Buffer>,
    hasher: Arc<dyn NameHasher>,
    index: EntryIndex,
    salt: u64,
    num_entries: usize,
    num_chunks: usize,
    /// Slot where the next free-slot scan starts
    alloc_next: usize,
}

impl MicroZap {
    /// Build the in-memory state from an on-disk micro block
    pub fn load(buf: Arc<Buffer>, hasher: Arc<dyn NameHasher>) -> Result<Self> {
        let mut index = EntryIndex::new();
        let (salt, num_chunks) = {
            let data = buf.read();
            let header = MicroHeader::read_from(&data)?;
            let num_chunks = block::slot_count(data.len());

            for chunk in 0..num_chunks {
                let Some(entry) = MicroEntry::read(&data, chunk)? else {
                    continue;
                };
                if entry.cd >= MAX_CD {
                    return Err(ZapError::CorruptBlock(format!(
                        "slot {} has collision differentiator {}",
                        chunk, entry.cd
                    )));
                }
                let hash = zap_hash(&*hasher, header.salt, &entry.name);
                if index.get(EntryKey::new(hash, entry.cd)).is_some() {
                    return Err(ZapError::CorruptBlock(format!(
                        "slot {} duplicates (hash, cd) of another entry",
                        chunk
                    )));
                }
                index.insert(chunk, hash, hash, entry);
            }
            (header.salt, num_chunks)
        };

        debug!(
            "Loaded micro directory {} ({} of {} slots used)",
            buf.object(),
            index.len(),
            num_chunks
        );

        Ok(MicroZap {
            num_entries: index.len(),
            buf,
            hasher,
            index,
            salt,
            num_chunks,
            alloc_next: 0,
        })
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Live entries, maintained incrementally
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Slot capacity of the current block
    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn is_full(&self) -> bool {
        self.num_entries == self.num_chunks
    }

    pub fn find(&self, hash: u64, name: &str) -> Option<&IndexNode> {
        self.index.find(hash, name)
    }

    pub fn find_unused_cd(&self, hash: u64) -> u32 {
        self.index.find_unused_cd(hash)
    }

    pub fn at_or_after(&self, key: EntryKey) -> Option<&IndexNode> {
        self.index.at_or_after(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexNode> {
        self.index.iter()
    }

    /// Free slots in scan order: from the allocation cursor to the end,
    /// then wrapping to the start
    fn free_slots<'a>(&self, data: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
        let (start, end) = (self.alloc_next, self.num_chunks);
        (start..end)
            .chain(0..start)
            .filter(move |&chunk| MicroEntry::is_free(data, chunk))
    }

    /// Add a new entry
    ///
    /// The caller holds the writer lock, has dirtied the buffer and has
    /// checked that `name` is not present.
    pub fn insert(&mut self, tx: &Tx, name: &str, hash: u64, value: u64) {
        debug_assert!(self.find(hash, name).is_none());

        let cd = self.find_unused_cd(hash);
        assert!(cd < MAX_CD, "collision chain exhausted for hash {:#x}", hash);

        let entry = MicroEntry::new(name, value, cd);
        let chunk = {
            let mut data = self.buf.write(tx);
            let chunk = self.free_slots(&data).next();
            let Some(chunk) = chunk else {
                panic!(
                    "micro directory {} out of slots ({} entries)",
                    self.buf.object(),
                    self.num_entries
                );
            };
            entry.write(&mut data, chunk);
            chunk
        };

        self.alloc_next = chunk + 1;
        if self.alloc_next == self.num_chunks {
            self.alloc_next = 0;
        }
        self.num_entries += 1;

        let expected = zap_hash(&*self.hasher, self.salt, name);
        self.index.insert(chunk, hash, expected, entry);
        debug!("Inserted '{}' at slot {} (cd {})", name, chunk, cd);
    }

    /// Overwrite the value of an existing entry
    pub fn update_value(&mut self, tx: &Tx, key: EntryKey, value: u64) -> bool {
        let Some(node) = self.index.get_mut(key) else {
            return false;
        };
        MicroEntry::write_value(&mut self.buf.write(tx), node.chunk, value);
        node.entry.value = value;
        true
    }

    /// Remove an entry, freeing its slot
    pub fn remove(&mut self, tx: &Tx, key: EntryKey) -> Option<MicroEntry> {
        let node = self.index.remove(key)?;
        MicroEntry::clear(&mut self.buf.write(tx), node.chunk);
        self.num_entries -= 1;
        debug!("Removed '{}' from slot {}", node.entry.name, node.chunk);
        Some(node.entry)
    }

    /// Recompute capacity after the block grew in place
    pub fn grow(&mut self, new_block_size: usize) {
        let num_chunks = block::slot_count(new_block_size);
        assert!(num_chunks >= self.num_chunks, "micro block cannot shrink");
        self.num_chunks = num_chunks;
    }

    /// Copy of every live entry with its hash, in (hash, cd) order
    pub fn snapshot(&self) -> Vec<(u64, MicroEntry)> {
        self.index
            .iter()
            .map(|node| (node.hash, node.entry.clone()))
            .collect()
    }
}

impl Drop for MicroZap {
    fn drop(&mut self) {
        self.index.destroy();
    }
}
