//! OTA package container.
//!
//! A package is a 16-byte base header, `file_count` per-file headers of 76
//! bytes each, then the payloads back to back in header order. All integers
//! are little-endian.
//!
//! The parser consumes only the headers. It leaves the stream positioned at
//! the first payload byte so the flash writer can take over without the
//! package ever being buffered whole.

use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::error::{NetworkError, OtaError, ProtocolError};
use crate::integrity::crc32;
use crate::manifest::{
    FirmwareEntry, FirmwareManifestStore, Manifest, FILE_HEADER_SIZE, FIRMWARE_NAME_FIELD,
    MAX_FIRMWARE_FILES,
};

/// Magic number of an OTA package ("ATO_" in memory order).
pub const OTA_PACKAGE_MAGIC: u32 = 0x5F4F_5441;

/// Size of the base header.
pub const BASE_HEADER_SIZE: usize = 16;

/// Format version written by [`PackageBuilder`].
pub const DEFAULT_FORMAT_VERSION: u32 = 1;

/// Fixed header at the start of every package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageHeader {
    /// CRC32 over the per-file headers. Carried, not checked.
    pub header_crc: u32,
    pub magic: u32,
    pub format_version: u32,
    pub file_count: u32,
}

impl PackageHeader {
    pub fn decode(raw: &[u8; BASE_HEADER_SIZE]) -> Self {
        let mut buf = &raw[..];
        Self {
            header_crc: buf.get_u32_le(),
            magic: buf.get_u32_le(),
            format_version: buf.get_u32_le(),
            file_count: buf.get_u32_le(),
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.header_crc);
        buf.put_u32_le(self.magic);
        buf.put_u32_le(self.format_version);
        buf.put_u32_le(self.file_count);
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != OTA_PACKAGE_MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: OTA_PACKAGE_MAGIC,
                found: self.magic,
            });
        }
        if self.file_count == 0 || self.file_count as usize > MAX_FIRMWARE_FILES {
            return Err(ProtocolError::BadFileCount {
                count: self.file_count,
                max: MAX_FIRMWARE_FILES,
            });
        }
        Ok(())
    }
}

/// Read until `buf` is full or the stream ends, retrying short reads.
///
/// Returns the number of bytes read, which is less than `buf.len()` only
/// when the stream ended.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> Result<usize, NetworkError> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(NetworkError::Read(e)),
        }
    }
    Ok(total)
}

/// Headers decoded from a package stream.
#[derive(Debug, Clone)]
pub struct ParsedPackage {
    pub header: PackageHeader,
    pub manifest: Manifest,
}

/// Decodes package headers and persists the manifest.
pub struct PackageParser<'a> {
    store: &'a FirmwareManifestStore<'a>,
}

impl<'a> PackageParser<'a> {
    pub fn new(store: &'a FirmwareManifestStore<'a>) -> Self {
        Self { store }
    }

    /// Decode the base header and every per-file header from `reader`, then
    /// persist the manifest.
    ///
    /// Nothing is written to storage unless every header decodes and
    /// validates. On success the stream sits at the first payload byte.
    pub fn parse<R: Read + ?Sized>(&self, reader: &mut R) -> Result<ParsedPackage, OtaError> {
        let mut raw = [0u8; BASE_HEADER_SIZE];
        let got = read_full(reader, &mut raw)?;
        debug!(bytes = got, head = %hex::encode(&raw[..got]), "package header bytes");
        if got < BASE_HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                what: "package header",
                expected: BASE_HEADER_SIZE,
                got,
            }
            .into());
        }

        let header = PackageHeader::decode(&raw);
        info!(
            header_crc = format_args!("{:#010x}", header.header_crc),
            magic = format_args!("{:#010x}", header.magic),
            format_version = header.format_version,
            file_count = header.file_count,
            "package header"
        );
        header.validate()?;

        let mut manifest = Manifest::new();
        for index in 0..header.file_count as usize {
            let mut record = [0u8; FILE_HEADER_SIZE];
            let got = read_full(reader, &mut record)?;
            if got < FILE_HEADER_SIZE {
                warn!(index, got, "per-file header cut short");
                return Err(ProtocolError::Truncated {
                    what: "file header",
                    expected: FILE_HEADER_SIZE,
                    got,
                }
                .into());
            }

            let entry = FirmwareEntry::decode(&record);
            info!(
                index,
                name = %entry.name,
                id = entry.id,
                gzip = entry.gzip_flag,
                compressed_len = entry.compressed_len,
                orig_len = entry.orig_len,
                addr = format_args!("{:#010x}", entry.dest_addr),
                data_crc = format_args!("{:#010x}", entry.data_crc),
                orig_crc = format_args!("{:#010x}", entry.orig_crc),
                region_size = format_args!("{:#x}", entry.region_size),
                "file header"
            );
            if !entry.fits_region() {
                return Err(ProtocolError::PayloadExceedsRegion {
                    name: entry.name.to_string(),
                    len: entry.compressed_len,
                    region: entry.region_size,
                }
                .into());
            }
            manifest
                .push(entry)
                .map_err(|_| ProtocolError::BadFileCount {
                    count: header.file_count,
                    max: MAX_FIRMWARE_FILES,
                })?;
        }

        self.store.replace_all(&manifest)?;
        info!(count = manifest.len(), "parsed and stored firmware manifest");

        Ok(ParsedPackage { header, manifest })
    }
}

/// Assembles package images, for tooling and tests.
#[derive(Debug)]
pub struct PackageBuilder {
    format_version: u32,
    files: Vec<(FirmwareEntry, Bytes)>,
}

impl PackageBuilder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            format_version: DEFAULT_FORMAT_VERSION,
            files: Vec::new(),
        }
    }

    pub fn format_version(mut self, version: u32) -> Self {
        self.format_version = version;
        self
    }

    /// Add an uncompressed binary; its header is derived from the payload.
    pub fn add_file(
        self,
        name: &str,
        dest_addr: u32,
        region_size: u32,
        payload: impl Into<Bytes>,
    ) -> Result<Self, OtaError> {
        if name.len() >= FIRMWARE_NAME_FIELD {
            return Err(OtaError::CapacityExceeded {
                what: "firmware name",
                capacity: FIRMWARE_NAME_FIELD - 1,
                requested: name.len(),
            });
        }
        let payload = payload.into();
        let len = u32::try_from(payload.len()).map_err(|_| OtaError::CapacityExceeded {
            what: "payload",
            capacity: u32::MAX as usize,
            requested: payload.len(),
        })?;
        let mut entry = FirmwareEntry::new(name, dest_addr, len, crc32(&payload), region_size);
        entry.id = self.files.len() as u16;
        Ok(self.add_raw(entry, payload))
    }

    /// Add a binary with a caller-supplied header, taken as-is.
    pub fn add_raw(mut self, entry: FirmwareEntry, payload: impl Into<Bytes>) -> Self {
        self.files.push((entry, payload.into()));
        self
    }

    pub fn build(self) -> Result<Bytes, OtaError> {
        if self.files.is_empty() || self.files.len() > MAX_FIRMWARE_FILES {
            return Err(ProtocolError::BadFileCount {
                count: self.files.len() as u32,
                max: MAX_FIRMWARE_FILES,
            }
            .into());
        }

        let mut headers = BytesMut::with_capacity(self.files.len() * FILE_HEADER_SIZE);
        for (entry, _) in &self.files {
            entry.encode(&mut headers);
        }

        let header = PackageHeader {
            header_crc: crc32(&headers),
            magic: OTA_PACKAGE_MAGIC,
            format_version: self.format_version,
            file_count: self.files.len() as u32,
        };

        let payload_len: usize = self.files.iter().map(|(_, p)| p.len()).sum();
        let mut out = BytesMut::with_capacity(BASE_HEADER_SIZE + headers.len() + payload_len);
        header.encode(&mut out);
        out.put_slice(&headers);
        for (_, payload) in &self.files {
            out.put_slice(payload);
        }
        Ok(out.freeze())
    }
}
