//! Serializable iteration position
//!
//! A cursor is a (hash, cd) pair. Its serialized form keeps only the hash
//! bits the hash function produces plus a few cd bits, so it fits in 32 bits
//! and orders the same way under plain integer comparison.

use crate::hash::HASH_BITS;
use crate::store::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Low bits of a serialized cursor holding the cd
pub const CD_BITS: u32 = 4;

/// Exclusive upper bound for collision differentiators
pub const MAX_CD: u32 = (1 << CD_BITS) - 1;

/// Serialized form of an exhausted cursor
pub const CURSOR_END: u64 = u64::MAX;

/// Low hash bits dropped by the hash mask
const HASH_SHIFT: u32 = 64 - HASH_BITS;

/// Position within one directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    object: ObjectId,
    hash: u64,
    cd: u32,
    exhausted: bool,
}

impl Cursor {
    /// Decode a serialized position
    ///
    /// `0` starts at the beginning, [`CURSOR_END`] is already exhausted. A
    /// cd field outside the representable range is reset to 0.
    pub fn init(object: ObjectId, serialized: u64) -> Self {
        if serialized == CURSOR_END {
            return Cursor {
                object,
                hash: 0,
                cd: 0,
                exhausted: true,
            };
        }

        let hash = (serialized >> CD_BITS) << HASH_SHIFT;
        let mut cd = (serialized & ((1 << CD_BITS) - 1)) as u32;
        if cd >= MAX_CD {
            warn!(
                "Cursor {:#x} on object {} has invalid cd {}, clamping",
                serialized, object, cd
            );
            cd = 0;
        }

        Cursor {
            object,
            hash,
            cd,
            exhausted: false,
        }
    }

    pub fn object(&self) -> ObjectId {
        self.object
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn cd(&self) -> u32 {
        self.cd
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Move onto the entry a retrieve just returned
    pub(crate) fn position(&mut self, hash: u64, cd: u32) {
        self.hash = hash;
        self.cd = cd;
    }

    pub(crate) fn exhaust(&mut self) {
        self.exhausted = true;
    }

    /// Step past the current position
    pub fn advance(&mut self) {
        if self.exhausted {
            return;
        }
        self.cd += 1;
        if self.cd >= MAX_CD {
            self.cd = 0;
            self.hash = self.hash.wrapping_add(1 << HASH_SHIFT);
            if self.hash == 0 {
                self.exhausted = true;
            }
        }
    }

    pub fn serialize(&self) -> u64 {
        if self.exhausted {
            return CURSOR_END;
        }
        ((self.hash >> HASH_SHIFT) << CD_BITS) | u64::from(self.cd)
    }
}

/// One entry as reported by a cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    /// Width of each integer in bytes
    pub integer_length: usize,
    pub num_integers: usize,
    pub first_integer: u64,
}
