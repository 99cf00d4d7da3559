//! Incremental CRC-32 accumulator shared by the framer and the parser.
//!
//! Standard CRC-32 (IEEE 802.3, reflected, init and xorout `0xFFFFFFFF`),
//! backed by `crc32fast`.

use crc32fast::Hasher;

#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything accumulated so far
    pub fn reset(&mut self) {
        self.hasher.reset();
    }

    pub fn update_byte(&mut self, byte: u8) {
        self.hasher.update(&[byte]);
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Checksum of everything accumulated so far; accumulation may continue
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// One-shot checksum of `bytes`
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}
