//! CRC32 over the archive body.
//!
//! The format uses the reflected CRC-32 (polynomial `0xEDB88320`, initial
//! value `0xFFFFFFFF`, final XOR `0xFFFFFFFF`) — the same checksum
//! `crc32fast` computes, so the codec is a thin streaming state over it.
//! Feeding slices one at a time yields the same value as one pass over
//! their concatenation.

/// Streaming CRC32 state.
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { hasher: crc32fast::Hasher::new() }
    }

    /// Feeds the next slice of the stream.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Consumes the state and yields the checksum.
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot convenience over [`Crc32`].
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut state = Crc32::new();
    state.update(bytes);
    state.finalize()
}
