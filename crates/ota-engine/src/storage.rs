//! Raw flash storage primitives.
//!
//! This module defines the `FlashStorage` trait the engine writes through and
//! provides two NOR-style implementations: an in-memory device for tests and
//! bring-up, and a file-backed image for running on a host.
//!
//! Both implementations follow NOR semantics: erase sets every byte of an
//! aligned block to `0xFF`, and programming can only clear bits.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Value of an erased flash byte.
pub const ERASED_BYTE: u8 = 0xFF;

/// Value of an erased 32-bit flash word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Default erase block size of the simulated devices.
pub const DEFAULT_ERASE_ALIGNMENT: u32 = 0x1000;

// ============================================================================
// Error Types
// ============================================================================

/// Errors reported by a storage driver.
#[derive(Debug, Error)]
pub enum FlashError {
    #[error("range {addr:#010x}+{len:#x} is outside the device")]
    OutOfRange { addr: u32, len: usize },

    #[error("address {addr:#010x} is not aligned to {alignment:#x}")]
    Misaligned { addr: u32, alignment: u32 },

    #[error("device lock poisoned")]
    Poisoned,

    #[error("device I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Trait
// ============================================================================

/// Byte-addressed flash device.
///
/// `read` and `write` return the number of bytes transferred. Callers treat a
/// count different from the request as a failure.
pub trait FlashStorage: Send + Sync {
    /// Minimum erasable unit at `addr`.
    fn erase_alignment(&self, addr: u32) -> u32;

    /// Erase `len` bytes starting at `addr`. Both must be aligned.
    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError>;

    /// Read into `buf` starting at `addr`.
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<usize, FlashError>;

    /// Program `data` starting at `addr`.
    fn write(&self, addr: u32, data: &[u8]) -> Result<usize, FlashError>;
}

/// Round `len` up to the next multiple of `alignment`.
pub fn align_up(len: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return len;
    }
    len.div_ceil(alignment).saturating_mul(alignment)
}

/// Erase `[addr, addr + align_up(len))` at the device's granularity.
///
/// Returns the number of bytes actually erased.
pub fn erase_aligned(storage: &dyn FlashStorage, addr: u32, len: u32) -> Result<u32, StorageError> {
    let aligned = align_up(len, storage.erase_alignment(addr));
    storage
        .erase(addr, aligned)
        .map_err(|e| StorageError::EraseFailed {
            addr,
            len: aligned,
            reason: e.to_string(),
        })?;
    Ok(aligned)
}

/// Program all of `data` at `addr`, treating a short count as a failure.
pub fn program(storage: &dyn FlashStorage, addr: u32, data: &[u8]) -> Result<(), StorageError> {
    let written = storage.write(addr, data).map_err(|e| {
        warn!(addr = format_args!("{:#010x}", addr), error = %e, "flash write failed");
        StorageError::WriteFailed {
            addr,
            expected: data.len(),
            written: 0,
        }
    })?;
    if written != data.len() {
        return Err(StorageError::WriteFailed {
            addr,
            expected: data.len(),
            written,
        });
    }
    Ok(())
}

/// Fill `buf` from `addr`, treating a short count as a failure.
pub fn read_into(storage: &dyn FlashStorage, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
    let expected = buf.len();
    let read = storage.read(addr, buf).map_err(|e| {
        warn!(addr = format_args!("{:#010x}", addr), error = %e, "flash read failed");
        StorageError::ReadFailed {
            addr,
            expected,
            read: 0,
        }
    })?;
    if read != expected {
        return Err(StorageError::ReadFailed {
            addr,
            expected,
            read,
        });
    }
    Ok(())
}

fn check_range(base: u32, capacity: usize, addr: u32, len: usize) -> Result<usize, FlashError> {
    let start = addr
        .checked_sub(base)
        .ok_or(FlashError::OutOfRange { addr, len })? as usize;
    match start.checked_add(len) {
        Some(end) if end <= capacity => Ok(start),
        _ => Err(FlashError::OutOfRange { addr, len }),
    }
}

fn check_erase(alignment: u32, addr: u32, len: u32) -> Result<(), FlashError> {
    if addr % alignment != 0 {
        return Err(FlashError::Misaligned { addr, alignment });
    }
    if len % alignment != 0 {
        return Err(FlashError::Misaligned {
            addr: addr.wrapping_add(len),
            alignment,
        });
    }
    Ok(())
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// In-memory flash device mapped at `base`.
pub struct MemoryFlash {
    base: u32,
    alignment: u32,
    cells: Mutex<Vec<u8>>,
}

impl MemoryFlash {
    /// Create an erased device of `size` bytes mapped at `base`.
    pub fn new(base: u32, size: usize) -> Self {
        Self::with_alignment(base, size, DEFAULT_ERASE_ALIGNMENT)
    }

    pub fn with_alignment(base: u32, size: usize, alignment: u32) -> Self {
        Self {
            base,
            alignment: alignment.max(1),
            cells: Mutex::new(vec![ERASED_BYTE; size]),
        }
    }

    /// First mapped address.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Device size in bytes.
    pub fn size(&self) -> usize {
        self.cells.lock().map(|cells| cells.len()).unwrap_or(0)
    }

    /// Copy of `len` bytes at `addr`, bypassing the driver interface.
    pub fn snapshot(&self, addr: u32, len: usize) -> Result<Vec<u8>, FlashError> {
        let cells = self.cells.lock().map_err(|_| FlashError::Poisoned)?;
        let start = check_range(self.base, cells.len(), addr, len)?;
        Ok(cells[start..start + len].to_vec())
    }
}

impl FlashStorage for MemoryFlash {
    fn erase_alignment(&self, _addr: u32) -> u32 {
        self.alignment
    }

    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        check_erase(self.alignment, addr, len)?;
        let mut cells = self.cells.lock().map_err(|_| FlashError::Poisoned)?;
        let start = check_range(self.base, cells.len(), addr, len as usize)?;
        cells[start..start + len as usize].fill(ERASED_BYTE);
        debug!(addr = format_args!("{:#010x}", addr), len, "memory flash erase");
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
        let cells = self.cells.lock().map_err(|_| FlashError::Poisoned)?;
        let start = check_range(self.base, cells.len(), addr, buf.len())?;
        buf.copy_from_slice(&cells[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<usize, FlashError> {
        let mut cells = self.cells.lock().map_err(|_| FlashError::Poisoned)?;
        let start = check_range(self.base, cells.len(), addr, data.len())?;
        for (cell, byte) in cells[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(data.len())
    }
}

// ============================================================================
// File-Backed Implementation
// ============================================================================

/// Flash image stored in a regular file, mapped at `base`.
pub struct FileFlash {
    base: u32,
    size: usize,
    alignment: u32,
    file: Mutex<File>,
}

impl FileFlash {
    /// Open an image, creating an erased one of `size` bytes if it does not exist.
    pub fn open_or_create(path: &Path, base: u32, size: usize) -> Result<Self, FlashError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let current = file.metadata()?.len() as usize;
        if current < size {
            file.seek(SeekFrom::Start(current as u64))?;
            file.write_all(&vec![ERASED_BYTE; size - current])?;
            file.flush()?;
            debug!(path = %path.display(), size, "initialised flash image");
        }

        Ok(Self {
            base,
            size,
            alignment: DEFAULT_ERASE_ALIGNMENT,
            file: Mutex::new(file),
        })
    }
}

impl FlashStorage for FileFlash {
    fn erase_alignment(&self, _addr: u32) -> u32 {
        self.alignment
    }

    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        check_erase(self.alignment, addr, len)?;
        let start = check_range(self.base, self.size, addr, len as usize)?;
        let mut file = self.file.lock().map_err(|_| FlashError::Poisoned)?;
        file.seek(SeekFrom::Start(start as u64))?;
        file.write_all(&vec![ERASED_BYTE; len as usize])?;
        file.flush()?;
        Ok(())
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
        let start = check_range(self.base, self.size, addr, buf.len())?;
        let mut file = self.file.lock().map_err(|_| FlashError::Poisoned)?;
        file.seek(SeekFrom::Start(start as u64))?;
        file.read_exact(buf)?;
        Ok(buf.len())
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<usize, FlashError> {
        let start = check_range(self.base, self.size, addr, data.len())?;
        let mut file = self.file.lock().map_err(|_| FlashError::Poisoned)?;

        let mut current = vec![0u8; data.len()];
        file.seek(SeekFrom::Start(start as u64))?;
        file.read_exact(&mut current)?;
        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= *byte;
        }

        file.seek(SeekFrom::Start(start as u64))?;
        file.write_all(&current)?;
        file.flush()?;
        Ok(data.len())
    }
}
