//! On-disk micro directory block
//!
//! A micro block is a flat array of 64-byte slots. Slot 0 holds the header;
//! every following slot holds one [`MicroEntry`].
//!
//! ```text
//! header (64 bytes)                  entry (64 bytes)
//! +0   block type   u64              +0   value  u64
//! +8   salt         u64              +8   cd     u32
//! +16  norm flags   u64 (zero)       +12  pad    u16
//! +24  reserved     40 bytes         +14  name   50 bytes, nul-terminated
//! ```
//!
//! All integers are written little-endian. Blocks produced on a host of the
//! other byte order are recognised by their swapped tag and converted with
//! [`byteswap_micro`].

use crate::error::{Result, ZapError};

/// Size of every slot, header included
pub const ENTRY_LEN: usize = 64;

/// Width of the name field; one byte is always left for the terminator
pub const NAME_FIELD_LEN: usize = ENTRY_LEN - 8 - 4 - 2;

/// Longest name the micro format can store
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

const VALUE_OFFSET: usize = 0;
const CD_OFFSET: usize = 8;
const NAME_OFFSET: usize = 14;

const SALT_OFFSET: usize = 8;
const NORMFLAGS_OFFSET: usize = 16;

/// Block-type tags stored in the first eight bytes of a directory object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum BlockType {
    /// Extended directory leaf block
    Leaf = (1 << 63),
    /// Extended directory header block
    Header = (1 << 63) + 1,
    /// Micro directory block
    Micro = (1 << 63) + 3,
}

impl BlockType {
    pub fn from_u64(value: u64) -> Result<Self> {
        match value {
            v if v == BlockType::Leaf as u64 => Ok(BlockType::Leaf),
            v if v == BlockType::Header as u64 => Ok(BlockType::Header),
            v if v == BlockType::Micro as u64 => Ok(BlockType::Micro),
            _ => Err(ZapError::InvalidBlockType(value)),
        }
    }

    /// Decode the leading tag of a block
    ///
    /// Returns the block type and whether the block was written in the
    /// opposite byte order.
    pub fn detect(block: &[u8]) -> Result<(Self, bool)> {
        let tag = read_u64(block, 0)?;
        if let Ok(block_type) = BlockType::from_u64(tag) {
            return Ok((block_type, false));
        }
        match BlockType::from_u64(tag.swap_bytes()) {
            Ok(block_type) => Ok((block_type, true)),
            Err(_) => Err(ZapError::InvalidBlockType(tag)),
        }
    }
}

/// Number of entry slots in a micro block of `block_size` bytes
pub fn slot_count(block_size: usize) -> usize {
    (block_size / ENTRY_LEN).saturating_sub(1)
}

fn slot_offset(chunk: usize) -> usize {
    (chunk + 1) * ENTRY_LEN
}

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    bytes
        .get(offset..offset + 8)
        .and_then(|b| b.try_into().ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| ZapError::CorruptBlock(format!("short read at offset {}", offset)))
}

/// Micro block header (slot 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroHeader {
    pub salt: u64,
    pub normflags: u64,
}

impl MicroHeader {
    pub fn new(salt: u64) -> Self {
        MicroHeader { salt, normflags: 0 }
    }

    pub fn write_to(&self, block: &mut [u8]) {
        block[..ENTRY_LEN].fill(0);
        block[0..8].copy_from_slice(&(BlockType::Micro as u64).to_le_bytes());
        block[SALT_OFFSET..SALT_OFFSET + 8].copy_from_slice(&self.salt.to_le_bytes());
        block[NORMFLAGS_OFFSET..NORMFLAGS_OFFSET + 8].copy_from_slice(&self.normflags.to_le_bytes());
    }

    pub fn read_from(block: &[u8]) -> Result<Self> {
        if block.len() < 2 * ENTRY_LEN {
            return Err(ZapError::CorruptBlock(format!(
                "micro block too small: {} bytes",
                block.len()
            )));
        }

        let tag = read_u64(block, 0)?;
        if tag != BlockType::Micro as u64 {
            return Err(ZapError::InvalidBlockType(tag));
        }

        let salt = read_u64(block, SALT_OFFSET)?;
        if salt == 0 {
            return Err(ZapError::CorruptBlock("zero salt".to_string()));
        }

        Ok(MicroHeader {
            salt,
            normflags: read_u64(block, NORMFLAGS_OFFSET)?,
        })
    }
}

/// One name/value slot of a micro block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MicroEntry {
    pub value: u64,
    pub cd: u32,
    pub name: String,
}

impl MicroEntry {
    pub fn new(name: &str, value: u64, cd: u32) -> Self {
        MicroEntry {
            value,
            cd,
            name: name.to_string(),
        }
    }

    /// Decode slot `chunk`; `None` for a free slot
    ///
    /// A name that is not valid UTF-8 is reported as corruption.
    pub fn read(block: &[u8], chunk: usize) -> Result<Option<Self>> {
        let Some(slot) = block.get(slot_offset(chunk)..slot_offset(chunk) + ENTRY_LEN) else {
            return Ok(None);
        };
        let name_field = &slot[NAME_OFFSET..NAME_OFFSET + NAME_FIELD_LEN];
        if name_field[0] == 0 {
            return Ok(None);
        }

        let len = name_field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD_LEN);
        let mut value = [0u8; 8];
        value.copy_from_slice(&slot[VALUE_OFFSET..VALUE_OFFSET + 8]);
        let mut cd = [0u8; 4];
        cd.copy_from_slice(&slot[CD_OFFSET..CD_OFFSET + 4]);

        let name = std::str::from_utf8(&name_field[..len]).map_err(|_| {
            ZapError::CorruptBlock(format!("slot {} name is not valid UTF-8", chunk))
        })?;

        Ok(Some(MicroEntry {
            value: u64::from_le_bytes(value),
            cd: u32::from_le_bytes(cd),
            name: name.to_string(),
        }))
    }

    /// Encode into slot `chunk`
    pub fn write(&self, block: &mut [u8], chunk: usize) {
        assert!(self.name.len() <= MAX_NAME_LEN, "name too long for micro slot");
        let offset = slot_offset(chunk);
        let slot = &mut block[offset..offset + ENTRY_LEN];
        slot.fill(0);
        slot[VALUE_OFFSET..VALUE_OFFSET + 8].copy_from_slice(&self.value.to_le_bytes());
        slot[CD_OFFSET..CD_OFFSET + 4].copy_from_slice(&self.cd.to_le_bytes());
        slot[NAME_OFFSET..NAME_OFFSET + self.name.len()].copy_from_slice(self.name.as_bytes());
    }

    /// Overwrite only the value of an occupied slot
    pub fn write_value(block: &mut [u8], chunk: usize, value: u64) {
        let offset = slot_offset(chunk) + VALUE_OFFSET;
        block[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Zero slot `chunk`, marking it free
    pub fn clear(block: &mut [u8], chunk: usize) {
        let offset = slot_offset(chunk);
        block[offset..offset + ENTRY_LEN].fill(0);
    }

    /// True if slot `chunk` holds no entry
    pub fn is_free(block: &[u8], chunk: usize) -> bool {
        block
            .get(slot_offset(chunk) + NAME_OFFSET)
            .map_or(true, |&b| b == 0)
    }
}

/// Write a fresh, empty micro block
pub fn format_micro(block: &mut [u8], salt: u64) {
    block.fill(0);
    MicroHeader::new(salt).write_to(block);
}

fn swap_u64_at(block: &mut [u8], offset: usize) {
    block[offset..offset + 8].reverse();
}

fn swap_u32_at(block: &mut [u8], offset: usize) {
    block[offset..offset + 4].reverse();
}

/// Reverse the byte order of every integer field in a micro block
///
/// Covers the tag, salt and flags of the header plus the value and cd of
/// every slot, free or live. Name bytes are left untouched.
pub fn byteswap_micro(block: &mut [u8]) {
    if block.len() < ENTRY_LEN {
        return;
    }
    swap_u64_at(block, 0);
    swap_u64_at(block, SALT_OFFSET);
    swap_u64_at(block, NORMFLAGS_OFFSET);

    for chunk in 0..slot_count(block.len()) {
        let offset = slot_offset(chunk);
        swap_u64_at(block, offset + VALUE_OFFSET);
        swap_u32_at(block, offset + CD_OFFSET);
    }
}
