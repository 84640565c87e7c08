//! Firmware manifest: per-binary metadata of the package being applied.
//!
//! The manifest is written to its own flash region before any payload byte
//! reaches a destination region. After a power loss mid-install the manifest
//! names every region that may hold a partial image.
//!
//! A persisted record uses the same 76-byte layout as a per-file header on
//! the wire:
//!
//! | Field          | Offset | Size |
//! |----------------|--------|------|
//! | name           | 0      | 48   |
//! | id             | 48     | 2    |
//! | gzip_flag      | 50     | 2    |
//! | compressed_len | 52     | 4    |
//! | orig_len       | 56     | 4    |
//! | dest_addr      | 60     | 4    |
//! | data_crc       | 64     | 4    |
//! | orig_crc       | 68     | 4    |
//! | region_size    | 72     | 4    |

use std::fmt;

use bytes::{Buf, BufMut};
use heapless::{String, Vec};
use tracing::{debug, info};

use crate::error::OtaError;
use crate::layout::{bounded, get_str_field, put_str_field};
use crate::storage::{erase_aligned, program, read_into, FlashStorage};

/// Maximum number of binaries in one package.
pub const MAX_FIRMWARE_FILES: usize = 3;

/// Width of the name field.
pub const FIRMWARE_NAME_FIELD: usize = 48;

/// Size of one per-file header / manifest record.
pub const FILE_HEADER_SIZE: usize = 76;

/// Bytes of the whole persisted manifest table.
pub const MANIFEST_TABLE_SIZE: usize = FILE_HEADER_SIZE * MAX_FIRMWARE_FILES;

/// Binary name, one byte short of the field to keep a terminator.
pub type FirmwareName = String<47>;

/// Bounded manifest as decoded from a package.
pub type Manifest = Vec<FirmwareEntry, MAX_FIRMWARE_FILES>;

/// Metadata of one binary inside a package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareEntry {
    pub name: FirmwareName,
    pub id: u16,
    pub gzip_flag: u16,
    pub compressed_len: u32,
    pub orig_len: u32,
    pub dest_addr: u32,
    pub data_crc: u32,
    pub orig_crc: u32,
    pub region_size: u32,
}

impl FirmwareEntry {
    /// Entry for an uncompressed payload with the given destination and CRC.
    pub fn new(name: &str, dest_addr: u32, len: u32, data_crc: u32, region_size: u32) -> Self {
        Self {
            name: bounded(name),
            compressed_len: len,
            orig_len: len,
            dest_addr,
            data_crc,
            orig_crc: data_crc,
            region_size,
            ..Self::default()
        }
    }

    /// Whether the payload fits the declared destination region.
    pub fn fits_region(&self) -> bool {
        self.compressed_len <= self.region_size
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        put_str_field(buf, &self.name, FIRMWARE_NAME_FIELD);
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.gzip_flag);
        buf.put_u32_le(self.compressed_len);
        buf.put_u32_le(self.orig_len);
        buf.put_u32_le(self.dest_addr);
        buf.put_u32_le(self.data_crc);
        buf.put_u32_le(self.orig_crc);
        buf.put_u32_le(self.region_size);
    }

    /// Decode a 76-byte record.
    pub fn decode(record: &[u8; FILE_HEADER_SIZE]) -> Self {
        let name = get_str_field(&record[..FIRMWARE_NAME_FIELD]);
        let mut rest = &record[FIRMWARE_NAME_FIELD..];

        Self {
            name,
            id: rest.get_u16_le(),
            gzip_flag: rest.get_u16_le(),
            compressed_len: rest.get_u32_le(),
            orig_len: rest.get_u32_le(),
            dest_addr: rest.get_u32_le(),
            data_crc: rest.get_u32_le(),
            orig_crc: rest.get_u32_le(),
            region_size: rest.get_u32_le(),
        }
    }
}

impl fmt::Display for FirmwareEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id {}, {} bytes -> {:#010x}, crc {:#010x}, region {:#x})",
            self.name, self.id, self.compressed_len, self.dest_addr, self.data_crc, self.region_size
        )
    }
}

/// Encode `entries` into a full table image; unused slots are zero-filled.
pub fn encode_manifest(entries: &[FirmwareEntry]) -> std::vec::Vec<u8> {
    let mut buf = std::vec::Vec::with_capacity(MANIFEST_TABLE_SIZE);
    for entry in entries.iter().take(MAX_FIRMWARE_FILES) {
        entry.encode(&mut buf);
    }
    buf.resize(MANIFEST_TABLE_SIZE, 0);
    buf
}

/// Manifest table stored at a fixed flash address.
pub struct FirmwareManifestStore<'a> {
    storage: &'a dyn FlashStorage,
    addr: u32,
}

impl<'a> FirmwareManifestStore<'a> {
    pub fn new(storage: &'a dyn FlashStorage, addr: u32) -> Self {
        Self { storage, addr }
    }

    /// Erase the manifest region and write `entries` as the new table.
    pub fn replace_all(&self, entries: &[FirmwareEntry]) -> Result<(), OtaError> {
        if entries.len() > MAX_FIRMWARE_FILES {
            return Err(OtaError::CapacityExceeded {
                what: "firmware manifest",
                capacity: MAX_FIRMWARE_FILES,
                requested: entries.len(),
            });
        }

        erase_aligned(self.storage, self.addr, MANIFEST_TABLE_SIZE as u32)?;
        program(self.storage, self.addr, &encode_manifest(entries))?;
        info!(count = entries.len(), "stored firmware manifest");

        for (i, entry) in self.load()?.iter().enumerate().take(entries.len()) {
            debug!(slot = i, name = %entry.name, "manifest readback");
        }
        Ok(())
    }

    /// Read every slot of the persisted table.
    pub fn load(&self) -> Result<Manifest, OtaError> {
        let mut image = [0u8; MANIFEST_TABLE_SIZE];
        read_into(self.storage, self.addr, &mut image)?;

        Ok(image
            .chunks_exact(FILE_HEADER_SIZE)
            .take(MAX_FIRMWARE_FILES)
            .map(|chunk| {
                let mut record = [0u8; FILE_HEADER_SIZE];
                record.copy_from_slice(chunk);
                FirmwareEntry::decode(&record)
            })
            .collect())
    }
}
