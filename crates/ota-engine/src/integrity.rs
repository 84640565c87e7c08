//! CRC32 integrity checks over byte slices and flash regions.
//!
//! The checksum is the standard reflected CRC-32 (polynomial `0xEDB88320`,
//! initial value and final XOR `0xFFFFFFFF`), the same one used by zlib and
//! by the packaging tool when it fills in `data_crc`.

use tracing::{debug, error, info};

use crate::error::{IntegrityError, OtaError, StorageError};
use crate::manifest::FirmwareEntry;
use crate::storage::{read_into, FlashStorage};
use crate::CHUNK_SIZE;

/// Running CRC32 that can be fed in arbitrary pieces.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue a checksum from a previously finalised value.
    pub fn resume(previous: u32) -> Self {
        Self {
            hasher: crc32fast::Hasher::new_with_initial(previous),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

/// One-shot CRC32 of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Re-reads written regions and checks them against the manifest CRC.
pub struct IntegrityVerifier<'a> {
    storage: &'a dyn FlashStorage,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(storage: &'a dyn FlashStorage) -> Self {
        Self { storage }
    }

    /// CRC32 of `len` bytes of storage starting at `addr`, read in
    /// `CHUNK_SIZE` pieces.
    pub fn region_crc(&self, addr: u32, len: u32) -> Result<u32, StorageError> {
        let mut chunk = [0u8; CHUNK_SIZE];
        let mut crc = Crc32::new();
        let mut offset = 0u32;

        while offset < len {
            let piece = ((len - offset) as usize).min(CHUNK_SIZE);
            let at = addr.checked_add(offset).ok_or(StorageError::ReadFailed {
                addr,
                expected: len as usize,
                read: offset as usize,
            })?;
            read_into(self.storage, at, &mut chunk[..piece])?;
            crc.update(&chunk[..piece]);
            offset += piece as u32;
        }

        Ok(crc.finalize())
    }

    /// Verify the payload of `entry` as it now sits in storage.
    pub fn verify(&self, entry: &FirmwareEntry) -> Result<(), OtaError> {
        debug!(name = %entry.name, "verifying crc");
        let actual = self.region_crc(entry.dest_addr, entry.compressed_len)?;

        if actual != entry.data_crc {
            error!(
                name = %entry.name,
                expected = format_args!("{:#010x}", entry.data_crc),
                actual = format_args!("{:#010x}", actual),
                "crc verification failed"
            );
            return Err(IntegrityError {
                name: entry.name.to_string(),
                expected: entry.data_crc,
                actual,
            }
            .into());
        }

        info!(name = %entry.name, crc = format_args!("{:#010x}", actual), "crc verification passed");
        Ok(())
    }
}
