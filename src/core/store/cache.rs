//! LRU cache of directory handles keyed by object id
//!
//! Plays the role of per-buffer user data: the first open of an object
//! attaches its handle here and later opens reuse it. Eviction drops the
//! cache's reference, which tears down the handle's entry index once no
//! caller still holds it.

use crate::error::Result;
use crate::handle::Zap;
use crate::store::ObjectId;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

pub struct HandleCache {
    cache: Mutex<LruCache<ObjectId, Arc<Zap>>>,
    capacity: usize,
}

impl HandleCache {
    /// Create a cache holding up to `capacity` idle handles
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        HandleCache {
            // Unbounded internally; trimming skips handles still in use
            cache: Mutex::new(LruCache::unbounded()),
            capacity,
        }
    }

    /// Handle attached to `object`, if any
    pub fn get(&self, object: ObjectId) -> Option<Arc<Zap>> {
        self.cache.lock().get(&object).cloned()
    }

    /// Handle attached to `object`, loading and attaching one on a miss
    ///
    /// The cache stays locked while `load` runs, so a handle is never built
    /// from bytes that another handle for the same object has since changed.
    pub fn get_or_load<F>(&self, object: ObjectId, load: F) -> Result<Arc<Zap>>
    where
        F: FnOnce() -> Result<Zap>,
    {
        let mut cache = self.cache.lock();
        if let Some(existing) = cache.get(&object) {
            return Ok(existing.clone());
        }
        let handle = Arc::new(load()?);
        cache.put(object, handle.clone());
        Self::trim(&mut cache, self.capacity);
        Ok(handle)
    }

    /// Drop the handle attached to `object` unless a caller still holds it
    pub fn evict(&self, object: ObjectId) -> bool {
        let mut cache = self.cache.lock();
        match cache.peek(&object) {
            Some(handle) if Arc::strong_count(handle) == 1 => {
                cache.pop(&object);
                debug!("Evicted directory handle for object {}", object);
                true
            }
            _ => false,
        }
    }

    /// Drop the handle of a freed object, whoever holds it
    pub(crate) fn discard(&self, object: ObjectId) {
        if self.cache.lock().pop(&object).is_some() {
            debug!("Discarded directory handle for freed object {}", object);
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict least recently used idle handles until within capacity
    fn trim(cache: &mut LruCache<ObjectId, Arc<Zap>>, capacity: usize) {
        while cache.len() > capacity {
            let victim = cache
                .iter()
                .rev()
                .find(|(_, handle)| Arc::strong_count(handle) == 1)
                .map(|(&object, _)| object);

            match victim {
                Some(object) => {
                    cache.pop(&object);
                    debug!("Evicted idle directory handle for object {}", object);
                }
                // Everything is in use; allow temporary overshoot
                None => break,
            }
        }
    }
}
