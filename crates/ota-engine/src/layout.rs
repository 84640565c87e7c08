//! On-flash layout of the update partition.
//!
//! The last 4 KiB of the loader partition holds the firmware manifest and the
//! 4 KiB before it holds the version catalog:
//!
//! ```text
//! loader_start                                    loader_start + loader_size
//! | ...payload space... | version catalog | firmware manifest |
//!                       ^ catalog_addr     ^ manifest_addr
//! ```

use bytes::BufMut;
use heapless::String;

use crate::error::OtaError;
use crate::storage::ERASED_BYTE;

/// Size reserved for each metadata table.
pub const METADATA_REGION_SIZE: u32 = 0x1000;

/// Addresses of the durable tables inside the update partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub loader_start: u32,
    pub loader_size: u32,
}

impl PartitionLayout {
    pub fn new(loader_start: u32, loader_size: u32) -> Result<Self, OtaError> {
        let layout = Self {
            loader_start,
            loader_size,
        };
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        if self.loader_size < 2 * METADATA_REGION_SIZE {
            return Err(OtaError::Config(format!(
                "loader partition of {:#x} bytes cannot hold the metadata regions",
                self.loader_size
            )));
        }
        if self.loader_start.checked_add(self.loader_size).is_none() {
            return Err(OtaError::Config(format!(
                "loader partition {:#010x}+{:#x} overflows the address space",
                self.loader_start, self.loader_size
            )));
        }
        Ok(())
    }

    /// Start of the firmware manifest region.
    pub fn manifest_addr(&self) -> u32 {
        self.loader_start + self.loader_size - METADATA_REGION_SIZE
    }

    /// Start of the version catalog region.
    pub fn catalog_addr(&self) -> u32 {
        self.manifest_addr() - METADATA_REGION_SIZE
    }
}

/// Copy `value` into a bounded string, cutting at the last character
/// boundary that fits.
pub fn bounded<const N: usize>(value: &str) -> String<N> {
    let mut out = String::new();
    for ch in value.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Write `value` as a NUL-padded field of exactly `width` bytes.
pub(crate) fn put_str_field(buf: &mut impl BufMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(width);
    buf.put_slice(&bytes[..len]);
    buf.put_bytes(0, width - len);
}

/// Decode a NUL-terminated field. Erased fields decode as empty.
pub(crate) fn get_str_field<const N: usize>(field: &[u8]) -> String<N> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    let raw = &field[..end];
    if raw.is_empty() || raw.iter().all(|b| *b == ERASED_BYTE) {
        return String::new();
    }
    bounded(&std::string::String::from_utf8_lossy(raw))
}
