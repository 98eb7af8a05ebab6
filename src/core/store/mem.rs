//! In-memory object store with optional file persistence
//!
//! Objects live in a hash table of shared buffers. When opened on a path,
//! every commit rewrites the store file: an 8-byte magic followed by a
//! bincode list of objects, each carrying a CRC-32 of its bytes.

use crate::config::ZapConfig;
use crate::error::{Result, ZapError};
use crate::store::{Buffer, HandleCache, ObjectId, ObjectStore, Tx};
use ahash::AHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Store file magic number
pub const STORE_MAGIC: [u8; 8] = *b"ZAPSTOR\x01";

#[derive(Serialize, Deserialize)]
struct StoredObject {
    id: ObjectId,
    checksum: u32,
    data: Vec<u8>,
}

pub struct MemStore {
    objects: RwLock<AHashMap<ObjectId, Arc<Buffer>>>,
    next_id: AtomicU64,
    next_txg: AtomicU64,
    handles: HandleCache,
    path: Option<PathBuf>,
}

impl MemStore {
    /// Create an empty, purely in-memory store
    pub fn new(config: &ZapConfig) -> Self {
        MemStore {
            objects: RwLock::new(AHashMap::new()),
            next_id: AtomicU64::new(1),
            next_txg: AtomicU64::new(1),
            handles: HandleCache::new(config.handle_cache_capacity),
            path: None,
        }
    }

    /// Open a file-backed store, creating the file if it does not exist
    pub fn open<P: AsRef<Path>>(path: P, config: &ZapConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = MemStore::new(config);

        if path.exists() {
            let objects = Self::read_file(&path)?;
            let max_id = objects.keys().copied().max().unwrap_or(0);
            info!("Opened store {:?} with {} objects", path, objects.len());
            store.objects = RwLock::new(objects);
            store.next_id = AtomicU64::new(max_id + 1);
        } else {
            Self::write_file(&path, &AHashMap::new())?;
            info!("Created store {:?}", path);
        }

        store.path = Some(path);
        Ok(store)
    }

    /// Start a transaction
    pub fn begin(&self) -> Tx {
        Tx::new(self.next_txg.fetch_add(1, Ordering::SeqCst))
    }

    /// Finish a transaction, persisting the store if file-backed
    pub fn commit(&self, tx: Tx) -> Result<()> {
        let dirty = tx.dirty_objects();
        {
            let objects = self.objects.read();
            for id in &dirty {
                if let Some(buf) = objects.get(id) {
                    buf.clear_dirty(tx.txg());
                }
            }
        }

        if let Some(path) = &self.path {
            Self::write_file(path, &self.objects.read())?;
        }

        debug!("Committed txg {} ({} dirty objects)", tx.txg(), dirty.len());
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.read().contains_key(&object)
    }

    fn write_file(path: &Path, objects: &AHashMap<ObjectId, Arc<Buffer>>) -> Result<()> {
        let mut records: Vec<StoredObject> = objects
            .iter()
            .map(|(&id, buf)| {
                let data = buf.read().clone();
                StoredObject {
                    id,
                    checksum: crc32fast::hash(&data),
                    data,
                }
            })
            .collect();
        records.sort_by_key(|r| r.id);

        let tmp = path.with_extension("tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&STORE_MAGIC)?;
            bincode::serialize_into(&mut writer, &records)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_file(path: &Path) -> Result<AHashMap<ObjectId, Arc<Buffer>>> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if magic != STORE_MAGIC {
            return Err(ZapError::CorruptBlock(format!(
                "bad store magic in {:?}",
                path
            )));
        }

        let records: Vec<StoredObject> = bincode::deserialize_from(&mut reader)?;
        let mut objects = AHashMap::with_capacity(records.len());
        for record in records {
            if crc32fast::hash(&record.data) != record.checksum {
                return Err(ZapError::ChecksumMismatch);
            }
            objects.insert(record.id, Arc::new(Buffer::new(record.id, record.data)));
        }
        Ok(objects)
    }
}

impl ObjectStore for MemStore {
    fn hold(&self, object: ObjectId) -> Result<Arc<Buffer>> {
        self.objects
            .read()
            .get(&object)
            .cloned()
            .ok_or(ZapError::NoSuchObject(object))
    }

    fn allocate(&self, size: usize, tx: &Tx) -> Result<ObjectId> {
        let mut objects = self.objects.write();
        let mut id = self.next_id.fetch_add(1, Ordering::SeqCst);
        while objects.contains_key(&id) {
            id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }

        let buf = Arc::new(Buffer::new(id, vec![0u8; size]));
        tx.note_dirty(&buf);
        objects.insert(id, buf);
        debug!("Allocated object {} ({} bytes)", id, size);
        Ok(id)
    }

    fn claim(&self, object: ObjectId, size: usize, tx: &Tx) -> Result<()> {
        let mut objects = self.objects.write();
        if objects.contains_key(&object) {
            return Err(ZapError::ObjectExists(object));
        }

        let buf = Arc::new(Buffer::new(object, vec![0u8; size]));
        tx.note_dirty(&buf);
        objects.insert(object, buf);
        self.next_id.fetch_max(object + 1, Ordering::SeqCst);
        debug!("Claimed object {} ({} bytes)", object, size);
        Ok(())
    }

    fn free(&self, object: ObjectId, tx: &Tx) -> Result<()> {
        let buf = self
            .objects
            .write()
            .remove(&object)
            .ok_or(ZapError::NoSuchObject(object))?;
        tx.note_dirty(&buf);
        self.handles.discard(object);
        debug!("Freed object {}", object);
        Ok(())
    }

    fn resize(&self, object: ObjectId, new_size: usize, tx: &Tx) -> Result<()> {
        let buf = self.hold(object)?;
        tx.note_dirty(&buf);
        buf.write(tx).resize(new_size, 0);
        debug!("Resized object {} to {} bytes", object, new_size);
        Ok(())
    }

    fn handles(&self) -> &HandleCache {
        &self.handles
    }
}
