//! Fixed-capacity byte buffers for wire types.
//!
//! Wire fields have hard upper bounds (200-byte packet payloads, 50-byte RPC
//! payloads, 50-byte sender addresses). These types carry those bounds in the
//! type so an oversized value cannot be constructed.

use crate::error::FrameError;
use std::fmt;
use std::ops::Deref;

/// Up to `N` bytes stored inline.
#[derive(Clone, Copy)]
pub struct BoundedBytes<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedBytes<N> {
    pub const CAPACITY: usize = N;

    pub const fn new() -> Self {
        Self {
            buf: [0u8; N],
            len: 0,
        }
    }

    /// Copy `bytes` in, failing with `PayloadTooLarge` past capacity.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > N {
            return Err(FrameError::PayloadTooLarge {
                size: bytes.len(),
                max: N,
            });
        }
        let mut buf = [0u8; N];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            buf,
            len: bytes.len(),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for BoundedBytes<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for BoundedBytes<N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> AsRef<[u8]> for BoundedBytes<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> PartialEq for BoundedBytes<N> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const N: usize> Eq for BoundedBytes<N> {}

impl<const N: usize> fmt::Debug for BoundedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedBytes<{N}>({:02x?})", self.as_slice())
    }
}

/// Width of the RPC sender field.
pub const ADDRESS_FIELD_SIZE: usize = 50;

/// Zero-padded, fixed-width sender address.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AddressField([u8; ADDRESS_FIELD_SIZE]);

impl AddressField {
    pub fn new(address: &str) -> Result<Self, FrameError> {
        let bytes = address.as_bytes();
        if bytes.len() > ADDRESS_FIELD_SIZE {
            return Err(FrameError::AddressTooLong(bytes.len()));
        }
        let mut field = [0u8; ADDRESS_FIELD_SIZE];
        field[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(field))
    }

    /// Wrap raw wire bytes. Validation happens in [`AddressField::as_str`].
    pub fn from_raw(raw: [u8; ADDRESS_FIELD_SIZE]) -> Self {
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_FIELD_SIZE] {
        &self.0
    }

    /// The address with padding stripped.
    pub fn as_str(&self) -> Result<&str, FrameError> {
        let end = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(ADDRESS_FIELD_SIZE);
        // Padding must be all zeros after the first terminator
        if self.0[end..].iter().any(|&b| b != 0) {
            return Err(FrameError::InvalidAddress);
        }
        std::str::from_utf8(&self.0[..end]).map_err(|_| FrameError::InvalidAddress)
    }
}

impl fmt::Debug for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(s) => write!(f, "AddressField({s:?})"),
            Err(_) => write!(f, "AddressField(<invalid>)"),
        }
    }
}
