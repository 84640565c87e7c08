//! Error types for the update engine.
//!
//! Every stage of an update attempt fails the whole attempt, so the
//! taxonomy is organised by the domain that failed rather than by stage.

use thiserror::Error;

/// Errors raised by the network session or the byte stream behind it.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The session could not be created or the request could not be sent
    #[error("session failed: {0}")]
    Session(String),

    /// Server answered with a status other than 200
    #[error("request failed with status {status}")]
    Status { status: u16 },

    /// The stream ended or failed before the expected bytes arrived
    #[error("short read: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// Declared package size is unusable
    #[error("invalid package size: {0}")]
    InvalidPackageSize(u64),

    /// Query response does not fit the receive buffer
    #[error("response too large: {length} bytes exceeds limit of {limit}")]
    ResponseTooLarge { length: u64, limit: usize },

    /// Read error on the underlying stream
    #[error("stream read failed: {0}")]
    Read(#[source] std::io::Error),
}

/// Errors raised while decoding the package container or the query response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated {what}: expected {expected} bytes, got {got}")]
    Truncated {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("bad package magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("invalid file count {count}, must be between 1 and {max}")]
    BadFileCount { count: u32, max: usize },

    #[error("{name}: payload of {len} bytes exceeds its {region:#x} byte region")]
    PayloadExceedsRegion { name: String, len: u32, region: u32 },

    #[error("server returned result {0}")]
    ServerResult(i64),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("empty response body")]
    EmptyResponse,
}

/// Errors raised by the persistent storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("erase of {len:#x} bytes at {addr:#010x} failed: {reason}")]
    EraseFailed { addr: u32, len: u32, reason: String },

    #[error("write at {addr:#010x} failed: wrote {written} of {expected} bytes")]
    WriteFailed {
        addr: u32,
        expected: usize,
        written: usize,
    },

    #[error("read at {addr:#010x} failed: read {read} of {expected} bytes")]
    ReadFailed {
        addr: u32,
        expected: usize,
        read: usize,
    },
}

/// CRC mismatch on a freshly written region.
#[derive(Debug, Error)]
#[error("crc mismatch for {name}: expected {expected:#010x}, got {actual:#010x}")]
pub struct IntegrityError {
    pub name: String,
    pub expected: u32,
    pub actual: u32,
}

/// Top-level error for engine operations.
#[derive(Debug, Error)]
pub enum OtaError {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    /// Catalog slot out of range or absent
    #[error("version entry {index} not found")]
    NotFound { index: usize },

    /// A bounded table was asked to hold more than it can
    #[error("{what} holds at most {capacity} entries, got {requested}")]
    CapacityExceeded {
        what: &'static str,
        capacity: usize,
        requested: usize,
    },

    /// Orchestrator transition not allowed from the current state
    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    /// An update attempt already holds the attempt guard
    #[error("an update attempt is already in progress")]
    UpdateInProgress,

    #[error("update worker panicked")]
    WorkerPanicked,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for OtaError {
    fn from(err: serde_json::Error) -> Self {
        OtaError::Protocol(ProtocolError::MalformedResponse(err.to_string()))
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        NetworkError::Session(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for OtaError {
    fn from(err: reqwest::Error) -> Self {
        OtaError::Network(err.into())
    }
}

impl OtaError {
    /// Whether the failure came from the network side, which the interface
    /// reports with its own popup.
    pub fn is_network(&self) -> bool {
        matches!(self, OtaError::Network(_))
    }
}
