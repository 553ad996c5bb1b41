//! CRC-64 checksum over packet frames.
//!
//! Uses the ECMA-182 polynomial in its reflected form (`CRC_64_XZ`), which is
//! the table most CRC-64 implementations ship as "ECMA". The checksum of a
//! packet covers `command ‖ BE u16 length ‖ payload`, so [`Crc64Digest`] lets
//! the packet layer feed those pieces without allocating.

use crc::{Crc, Digest, CRC_64_XZ};

static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// One-shot CRC-64 of `bytes`.
pub fn crc64(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Incremental CRC-64 for checksums computed over several slices.
pub struct Crc64Digest {
    inner: Digest<'static, u64>,
}

impl Crc64Digest {
    pub fn new() -> Self {
        Self {
            inner: CRC64.digest(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn finalize(self) -> u64 {
        self.inner.finalize()
    }
}

impl Default for Crc64Digest {
    fn default() -> Self {
        Self::new()
    }
}
