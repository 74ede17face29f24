//! Payload masking (RFC 6455 section 5.3).
//!
//! The mask key is stored as a `u32` holding the four wire bytes in
//! big-endian order, so wire byte `i % 4` is `key.to_be_bytes()[i % 4]`.

/// XOR `data` with the mask key. Applying the same key twice restores the
/// input.
#[inline]
pub fn apply_mask(data: &mut [u8], key: u32) {
    let mask = key.to_be_bytes();
    let word = u32::from_ne_bytes(mask);

    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ word;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (byte, m) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= m;
    }
}

/// Byte-by-byte reference masking.
#[inline]
pub fn apply_mask_scalar(data: &mut [u8], key: u32) {
    let mask = key.to_be_bytes();
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Fast non-cryptographic mask key source.
///
/// Seeded once from the OS RNG, then advanced with a Weyl sequence and a
/// 32-bit finalizer per key.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    /// Seed a generator from the OS RNG, falling back to the clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(random_seed())
    }

    #[must_use]
    pub const fn with_seed(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Draw the next mask key.
    pub fn next_key(&mut self) -> u32 {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let b = self.state.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d ^ (d >> 16)
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}
