//! Salted CRC-64 name hashing
//!
//! Only the high [`HASH_BITS`] bits of the result are kept, so ordering and
//! cursor positions depend on the most significant bits alone.

/// Reflected ECMA-182 polynomial
pub const CRC64_POLY: u64 = 0xC96C_5795_D787_0F42;

/// Hash bits retained after masking
pub const HASH_BITS: u32 = 28;

/// Mask that clears every bit below the retained hash bits
pub const HASH_MASK: u64 = !((1u64 << (64 - HASH_BITS)) - 1);

const fn build_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u64;
        let mut bit = 0;
        while bit < 8 {
            crc = (crc >> 1) ^ ((crc & 1).wrapping_neg() & CRC64_POLY);
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC64_TABLE: [u64; 256] = build_table();

/// Source of raw 64-bit name hashes
///
/// Directories mask whatever this returns down to [`HASH_BITS`]. Swapping in
/// a custom hasher is mainly useful to force collisions in tests.
pub trait NameHasher: Send + Sync {
    fn hash(&self, salt: u64, name: &[u8]) -> u64;
}

/// Default hasher: byte-wise CRC-64 seeded with the directory salt
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc64Hasher;

impl NameHasher for Crc64Hasher {
    fn hash(&self, salt: u64, name: &[u8]) -> u64 {
        crc64(salt, name)
    }
}

/// Raw salted CRC-64 over `bytes`
pub fn crc64(salt: u64, bytes: &[u8]) -> u64 {
    assert_ne!(salt, 0, "directory salt must be non-zero");
    bytes.iter().fold(salt, |h, &b| {
        (h >> 8) ^ CRC64_TABLE[((h ^ b as u64) & 0xff) as usize]
    })
}

/// Hash a directory entry name, keeping only the high hash bits
pub fn zap_hash(hasher: &dyn NameHasher, salt: u64, name: &str) -> u64 {
    hasher.hash(salt, name.as_bytes()) & HASH_MASK
}
