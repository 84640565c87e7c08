//! Persisted table of update versions offered by the server.
//!
//! The table has a fixed number of slots and lives in its own flash region.
//! It is only ever replaced as a whole: erase the region, then write every
//! slot. Slots with an empty name are absent.

use bytes::{Buf, BufMut};
use heapless::{String, Vec};
use tracing::{debug, info};

use crate::error::OtaError;
use crate::layout::{bounded, get_str_field, put_str_field};
use crate::storage::{erase_aligned, program, read_into, FlashStorage, ERASED_WORD};

/// Number of slots in the catalog.
pub const MAX_VERSIONS: usize = 5;

/// Width of the persisted name field.
pub const VERSION_NAME_FIELD: usize = 32;

/// Width of the persisted download locator field.
pub const LOCATOR_FIELD: usize = 256;

/// Bytes per persisted slot: name, locator, then a little-endian flag word.
pub const VERSION_RECORD_SIZE: usize = VERSION_NAME_FIELD + LOCATOR_FIELD + 4;

/// Bytes of the whole persisted table.
pub const VERSION_TABLE_SIZE: usize = VERSION_RECORD_SIZE * MAX_VERSIONS;

/// Version name, one byte short of the field to keep a terminator.
pub type VersionName = String<31>;

/// Download locator, one byte short of the field to keep a terminator.
pub type Locator = String<255>;

/// Bounded list of entries that fits the catalog.
pub type VersionTable = Vec<VersionEntry, MAX_VERSIONS>;

/// One version the device can update to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEntry {
    pub name: VersionName,
    pub source_locator: Locator,
    pub needs_update: bool,
}

impl VersionEntry {
    /// Build an entry, truncating oversized strings to their field bounds.
    pub fn new(name: &str, source_locator: &str, needs_update: bool) -> Self {
        Self {
            name: bounded(name),
            source_locator: bounded(source_locator),
            needs_update,
        }
    }

    /// An empty name marks an unused slot.
    pub fn is_absent(&self) -> bool {
        self.name.is_empty()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        put_str_field(buf, &self.name, VERSION_NAME_FIELD);
        put_str_field(buf, &self.source_locator, LOCATOR_FIELD);
        buf.put_u32_le(u32::from(self.needs_update));
    }

    fn decode(record: &[u8]) -> Self {
        let name = get_str_field(&record[..VERSION_NAME_FIELD]);
        let source_locator =
            get_str_field(&record[VERSION_NAME_FIELD..VERSION_NAME_FIELD + LOCATOR_FIELD]);
        let mut flag = &record[VERSION_NAME_FIELD + LOCATOR_FIELD..VERSION_RECORD_SIZE];
        let flag = flag.get_u32_le();

        Self {
            name,
            source_locator,
            needs_update: flag != 0 && flag != ERASED_WORD,
        }
    }
}

/// Encode `entries` into a full table image; unused slots are zero-filled.
pub fn encode_table(entries: &[VersionEntry]) -> std::vec::Vec<u8> {
    let mut buf = std::vec::Vec::with_capacity(VERSION_TABLE_SIZE);
    for entry in entries.iter().take(MAX_VERSIONS) {
        entry.encode(&mut buf);
    }
    buf.resize(VERSION_TABLE_SIZE, 0);
    buf
}

/// Decode a full table image into its slots.
pub fn decode_table(image: &[u8]) -> VersionTable {
    image
        .chunks_exact(VERSION_RECORD_SIZE)
        .take(MAX_VERSIONS)
        .map(VersionEntry::decode)
        .collect()
}

/// Version catalog stored at a fixed flash address.
pub struct VersionCatalog<'a> {
    storage: &'a dyn FlashStorage,
    addr: u32,
}

impl<'a> VersionCatalog<'a> {
    pub fn new(storage: &'a dyn FlashStorage, addr: u32) -> Self {
        Self { storage, addr }
    }

    /// Region start address.
    pub fn addr(&self) -> u32 {
        self.addr
    }

    /// Read slot `index`. Absent slots are returned as-is; callers skip them.
    pub fn get(&self, index: usize) -> Result<VersionEntry, OtaError> {
        if index >= MAX_VERSIONS {
            return Err(OtaError::NotFound { index });
        }
        let mut record = [0u8; VERSION_RECORD_SIZE];
        let at = self.addr + (index * VERSION_RECORD_SIZE) as u32;
        read_into(self.storage, at, &mut record)?;
        Ok(VersionEntry::decode(&record))
    }

    /// Read every slot, absent ones included.
    pub fn entries(&self) -> Result<VersionTable, OtaError> {
        let mut image = vec![0u8; VERSION_TABLE_SIZE];
        read_into(self.storage, self.addr, &mut image)?;
        Ok(decode_table(&image))
    }

    /// Index and entry of every present slot.
    pub fn present(&self) -> Result<std::vec::Vec<(usize, VersionEntry)>, OtaError> {
        Ok(self
            .entries()?
            .into_iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_absent())
            .collect())
    }

    /// Erase the region and write `entries` as the new table.
    pub fn replace_all(&self, entries: &[VersionEntry]) -> Result<(), OtaError> {
        if entries.len() > MAX_VERSIONS {
            return Err(OtaError::CapacityExceeded {
                what: "version catalog",
                capacity: MAX_VERSIONS,
                requested: entries.len(),
            });
        }

        let erased = erase_aligned(self.storage, self.addr, VERSION_TABLE_SIZE as u32)?;
        debug!(
            addr = format_args!("{:#010x}", self.addr),
            erased, "erased version catalog region"
        );

        program(self.storage, self.addr, &encode_table(entries))?;
        info!(count = entries.len(), "saved version catalog");

        for (i, entry) in self.entries()?.iter().enumerate().take(entries.len()) {
            debug!(slot = i, name = %entry.name, needs_update = entry.needs_update, "catalog readback");
        }
        Ok(())
    }

    /// Drop the pending-update marks after a successful install.
    ///
    /// Every slot is rewritten zeroed, names and locators included. The flag
    /// only has meaning next to its entry, and erase plus rewrite of the whole
    /// region is the only atomic unit the storage offers.
    pub fn clear_update_flags(&self) -> Result<(), OtaError> {
        erase_aligned(self.storage, self.addr, VERSION_TABLE_SIZE as u32)?;
        program(self.storage, self.addr, &encode_table(&[]))?;
        info!("cleared version update flags");
        Ok(())
    }
}
