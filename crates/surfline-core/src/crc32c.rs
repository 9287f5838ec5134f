//! CRC-32C (Castagnoli), the payload checksum for framed messages.
//!
//! Reflected polynomial 0x82F63B78, initial value and final xor of
//! 0xFFFFFFFF. The lookup table is built at compile time.

/// Reflected Castagnoli polynomial.
pub const POLYNOMIAL: u32 = 0x82F6_3B78;

/// 256-entry lookup table, one entry per byte value.
pub const TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut crc = n as u32;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLYNOMIAL
            } else {
                crc >> 1
            };
            bit += 1;
        }
        table[n] = crc;
        n += 1;
    }
    table
}

/// Checksum a complete buffer.
pub fn crc32c(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32c::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Incremental CRC-32C.
///
/// Feeding the same bytes in several `update` calls yields the same value as
/// one call to [`crc32c`] over their concatenation.
#[derive(Debug, Clone, Copy)]
pub struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub fn new() -> Self {
        Self { state: !0 }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &byte in bytes {
            crc = TABLE[((crc ^ byte as u32) & 0xFF) as usize] ^ (crc >> 8);
        }
        self.state = crc;
    }

    pub fn finalize(self) -> u32 {
        !self.state
    }
}

impl Default for Crc32c {
    fn default() -> Self {
        Self::new()
    }
}
