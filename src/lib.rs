//! # zap-rs - Micro Directory Engine
//!
//! `zap-rs` stores name/value directories directly inside storage objects.
//! Small directories use the compact micro format:
//!
//! - **Fixed 64-byte slots** in a single block, with a salted CRC-64 name hash
//! - **Ordered in-memory index** rebuilt on load, kept in step with every write
//! - **In-place growth** by doubling the block, then promotion to the
//!   extended format once the micro maximum is reached
//! - **Stable cursors** that serialize to a 32-bit-safe integer
//! - **Byte-order portable** blocks, converted on load when foreign
//!
//! ## Quick Start
//!
//! ```rust
//! use zap_rs::{Result, ZapBuilder};
//!
//! # fn main() -> Result<()> {
//! let dirs = ZapBuilder::new().build()?;
//!
//! let tx = dirs.store().begin();
//! let dir = dirs.create(&tx)?;
//! dirs.add_u64(dir, "alice", 42, &tx)?;
//! dirs.add_u64(dir, "bob", 7, &tx)?;
//! dirs.store().commit(tx)?;
//!
//! assert_eq!(dirs.lookup_u64(dir, "alice")?, 42);
//! assert_eq!(dirs.count(dir)?, 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Iteration
//!
//! ```rust
//! use zap_rs::{Result, ZapBuilder};
//!
//! # fn main() -> Result<()> {
//! let dirs = ZapBuilder::new().build()?;
//! let tx = dirs.store().begin();
//! let dir = dirs.create(&tx)?;
//! dirs.add_u64(dir, "a", 1, &tx)?;
//!
//! // Positions survive being handed out as plain integers
//! let mut cursor = dirs.cursor_init(dir, 0);
//! while let Some(attr) = dirs.cursor_retrieve(&mut cursor)? {
//!     println!("{} = {}", attr.name, attr.first_integer);
//!     dirs.cursor_advance(&mut cursor);
//! }
//! let resume_at = dirs.cursor_serialize(&cursor);
//! # let _ = resume_at;
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    block, config, cursor, dirs, error, extended, handle, hash, index, micro, store,
};

// Re-export core types that users need
pub use crate::core::{
    block::{BlockType, ENTRY_LEN, MAX_NAME_LEN},
    config::ZapConfig,
    cursor::{Attribute, Cursor, CURSOR_END},
    dirs::{DirFormat, Entries, ZapDirs, ZapStats},
    error::{Result, ZapError},
    hash::{Crc64Hasher, NameHasher},
    store::{Buffer, HandleCache, MemStore, ObjectId, ObjectStore, Tx},
};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Builder for a [`MemStore`]-backed directory engine
///
/// # Examples
///
/// ```rust,no_run
/// use zap_rs::ZapBuilder;
///
/// # fn main() -> zap_rs::Result<()> {
/// let dirs = ZapBuilder::new()
///     .path("/data/dirs.zap")      // Optional: persist on commit
///     .micro_max_block_size(64 * 1024)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ZapBuilder {
    config: ZapConfig,
    path: Option<PathBuf>,
    hasher: Option<Arc<dyn NameHasher>>,
}

impl ZapBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        ZapBuilder {
            config: ZapConfig::default(),
            path: None,
            hasher: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ZapConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the configuration from a TOML file
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.config = ZapConfig::load(path)?;
        Ok(self)
    }

    /// Persist the store to `path` on every commit
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn initial_block_size(mut self, size: usize) -> Self {
        self.config.initial_block_size = size;
        self
    }

    pub fn micro_max_block_size(mut self, size: usize) -> Self {
        self.config.micro_max_block_size = size;
        self
    }

    pub fn handle_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.handle_cache_capacity = capacity;
        self
    }

    /// Use a custom name hasher instead of CRC-64
    pub fn hasher(mut self, hasher: Arc<dyn NameHasher>) -> Self {
        self.hasher = Some(hasher);
        self
    }

    /// Build the directory engine
    pub fn build(self) -> Result<ZapDirs<MemStore>> {
        self.config.validate()?;

        let store = match &self.path {
            Some(path) => {
                info!("Opening directory store at {:?}", path);
                MemStore::open(path, &self.config)?
            }
            None => MemStore::new(&self.config),
        };

        let dirs = match self.hasher {
            Some(hasher) => {
                debug!("Using custom name hasher");
                ZapDirs::with_hasher(Arc::new(store), self.config, hasher)?
            }
            None => ZapDirs::new(Arc::new(store), self.config)?,
        };
        Ok(dirs)
    }
}

impl Default for ZapBuilder {
    fn default() -> Self {
        Self::new()
    }
}
