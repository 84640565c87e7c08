//! # ota-engine
//!
//! Over-the-air firmware update engine for a flash-based device.
//!
//! This crate handles:
//! - Version query against the update server and the persistent version catalog
//! - Streaming package parsing and the persistent firmware manifest
//! - Chunked flash programming with progress reporting
//! - CRC32 read-back verification of every written binary
//! - A bounded mailbox carrying status events to the interface thread
//!
//! ## Storage
//!
//! Two metadata tables live at fixed offsets near the end of the loader
//! partition, see [`layout::PartitionLayout`]. Binaries are written to the
//! destinations named by the package itself. Nothing is ever buffered whole:
//! at most [`CHUNK_SIZE`] bytes of payload are held at a time.

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod integrity;
pub mod layout;
pub mod manifest;
pub mod orchestrator;
pub mod package;
#[cfg(test)]
mod proptests;
pub mod query;
pub mod storage;
pub mod transport;
pub mod ui;
pub mod version;
pub mod writer;

/// Transfer unit for streaming, programming and verification.
pub const CHUNK_SIZE: usize = 1024;

// Re-export main types for convenience
pub use catalog::{VersionCatalog, VersionEntry, MAX_VERSIONS};
pub use config::{EngineConfig, LocatorRewrite, NetworkConfig, PartitionConfig, UiConfig};
pub use context::{DeviceControl, EngineContext};
pub use error::{IntegrityError, NetworkError, OtaError, ProtocolError, StorageError};
pub use events::{mailbox, LinkStatus, MessageKind, StatusColor, UiMessage, UiReceiver, UiSender};
pub use integrity::{crc32, IntegrityVerifier};
pub use layout::PartitionLayout;
pub use manifest::{FirmwareEntry, FirmwareManifestStore, MAX_FIRMWARE_FILES};
pub use orchestrator::{ApplyReport, OtaState, Selection, UpdateHandle, UpdateOrchestrator};
pub use package::{PackageBuilder, PackageHeader, PackageParser, ParsedPackage, OTA_PACKAGE_MAGIC};
pub use query::VersionQuery;
pub use storage::{FileFlash, FlashError, FlashStorage, MemoryFlash};
#[cfg(feature = "http")]
pub use transport::ReqwestTransport;
pub use transport::{FileTransport, HttpResponse, HttpTransport};
pub use ui::{ConfirmAction, Popup, UiState};
pub use version::{compare, VersionOrdering};
pub use writer::{ProgressTracker, StreamingFlashWriter, WriteOutcome};
