//! Streams package payloads straight from the network into flash.
//!
//! Only one `CHUNK_SIZE` buffer is held at a time: each chunk is written to
//! its destination as soon as it is read.

use std::io::{ErrorKind, Read};

use tracing::{debug, error, info, warn};

use crate::error::{NetworkError, OtaError, StorageError};
use crate::events::UiSender;
use crate::manifest::FirmwareEntry;
use crate::storage::{erase_aligned, program, FlashStorage};
use crate::CHUNK_SIZE;

/// Width of a progress bucket in percent.
pub const PROGRESS_BUCKET: u8 = 5;

/// Decides when a progress event is worth sending.
///
/// An event goes out whenever the percentage enters a new 5% bucket, and
/// always at 100%.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last_sent: Option<u8>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integer percentage of `written` out of `total`.
    pub fn percent(written: u64, total: u64) -> u8 {
        if total == 0 {
            return 100;
        }
        (written.min(total) * 100 / total) as u8
    }

    /// Record progress; returns the percentage to report, if any.
    pub fn observe(&mut self, written: u64, total: u64) -> Option<u8> {
        let percent = Self::percent(written, total);
        let last_bucket = self.last_sent.unwrap_or(0) / PROGRESS_BUCKET;
        if percent / PROGRESS_BUCKET != last_bucket || percent == 100 {
            self.last_sent = Some(percent);
            Some(percent)
        } else {
            None
        }
    }

    pub fn last_sent(&self) -> Option<u8> {
        self.last_sent
    }
}

/// Result of writing one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: u32 },
    /// Zero-length entry, nothing touched
    Skipped,
}

/// Erases destination regions and fills them from the package stream.
pub struct StreamingFlashWriter<'a> {
    storage: &'a dyn FlashStorage,
    events: &'a UiSender,
    buffer: Box<[u8; CHUNK_SIZE]>,
}

impl<'a> StreamingFlashWriter<'a> {
    pub fn new(storage: &'a dyn FlashStorage, events: &'a UiSender) -> Self {
        Self {
            storage,
            events,
            buffer: Box::new([0u8; CHUNK_SIZE]),
        }
    }

    /// Erase the destination of `entry` and copy its payload from `reader`.
    ///
    /// A zero-length entry is logged and skipped.
    pub fn write_entry<R: Read + ?Sized>(
        &mut self,
        entry: &FirmwareEntry,
        reader: &mut R,
    ) -> Result<WriteOutcome, OtaError> {
        let total = entry.compressed_len;
        if total == 0 {
            warn!(name = %entry.name, "firmware has zero length, skipping");
            return Ok(WriteOutcome::Skipped);
        }

        info!(
            name = %entry.name,
            addr = format_args!("{:#010x}", entry.dest_addr),
            region_size = format_args!("{:#x}", entry.region_size),
            "erasing flash region"
        );
        erase_aligned(self.storage, entry.dest_addr, entry.region_size)?;

        let mut tracker = ProgressTracker::new();
        let mut written = 0u32;

        while written < total {
            let want = ((total - written) as usize).min(CHUNK_SIZE);
            let got = self.read_chunk(reader, want)?;
            if got == 0 {
                error!(name = %entry.name, written, total, "payload stream ended early");
                return Err(NetworkError::ShortRead {
                    expected: want,
                    got: 0,
                }
                .into());
            }

            let addr = entry
                .dest_addr
                .checked_add(written)
                .ok_or(StorageError::WriteFailed {
                    addr: entry.dest_addr,
                    expected: total as usize,
                    written: written as usize,
                })?;
            program(self.storage, addr, &self.buffer[..got])?;
            written += got as u32;

            if let Some(percent) = tracker.observe(u64::from(written), u64::from(total)) {
                info!(name = %entry.name, percent, written, total, "writing firmware");
                self.events.progress(percent);
            }
        }

        debug!(name = %entry.name, bytes = written, "firmware written");
        Ok(WriteOutcome::Written { bytes: written })
    }

    /// One read of at most `want` bytes. Zero means the stream is done.
    fn read_chunk<R: Read + ?Sized>(&mut self, reader: &mut R, want: usize) -> Result<usize, OtaError> {
        loop {
            match reader.read(&mut self.buffer[..want]) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetworkError::Read(e).into()),
            }
        }
    }
}
