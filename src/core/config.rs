//! Directory engine configuration
//!
//! Block sizes and cache bounds are read from TOML. Every field has a
//! default, so an empty document is a valid configuration.

use crate::block::ENTRY_LEN;
use crate::error::{Result, ZapError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest block a micro directory may grow to before promotion
pub const DEFAULT_MICRO_MAX_BLOCK_SIZE: usize = 128 * 1024;

/// Block size new directories start with
pub const DEFAULT_INITIAL_BLOCK_SIZE: usize = 512;

/// Block size used once a directory is promoted to the extended format
pub const DEFAULT_EXTENDED_BLOCK_SIZE: usize = 16 * 1024;

/// Number of directory handles kept resident by the store
pub const DEFAULT_HANDLE_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZapConfig {
    /// Block size of a freshly created micro directory
    pub initial_block_size: usize,

    /// Micro directories double in place up to this size, then promote
    pub micro_max_block_size: usize,

    /// Allocation unit of the extended format
    pub extended_block_size: usize,

    /// Resident directory handles before LRU eviction kicks in
    pub handle_cache_capacity: usize,
}

impl Default for ZapConfig {
    fn default() -> Self {
        ZapConfig {
            initial_block_size: DEFAULT_INITIAL_BLOCK_SIZE,
            micro_max_block_size: DEFAULT_MICRO_MAX_BLOCK_SIZE,
            extended_block_size: DEFAULT_EXTENDED_BLOCK_SIZE,
            handle_cache_capacity: DEFAULT_HANDLE_CACHE_CAPACITY,
        }
    }
}

impl ZapConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ZapConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("initial_block_size", self.initial_block_size),
            ("micro_max_block_size", self.micro_max_block_size),
            ("extended_block_size", self.extended_block_size),
        ] {
            if !value.is_power_of_two() {
                return Err(ZapError::InvalidConfig(format!(
                    "{} must be a power of two, got {}",
                    field, value
                )));
            }
        }

        // Header slot plus at least one entry slot
        if self.initial_block_size < 2 * ENTRY_LEN {
            return Err(ZapError::InvalidConfig(format!(
                "initial_block_size must be at least {}, got {}",
                2 * ENTRY_LEN,
                self.initial_block_size
            )));
        }

        if self.initial_block_size > self.micro_max_block_size {
            return Err(ZapError::InvalidConfig(format!(
                "initial_block_size ({}) exceeds micro_max_block_size ({})",
                self.initial_block_size, self.micro_max_block_size
            )));
        }

        if self.extended_block_size < 512 {
            return Err(ZapError::InvalidConfig(format!(
                "extended_block_size must be at least 512, got {}",
                self.extended_block_size
            )));
        }

        if self.handle_cache_capacity == 0 {
            return Err(ZapError::InvalidConfig(
                "handle_cache_capacity must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
