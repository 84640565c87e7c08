//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use ota_engine::{
    mailbox, DeviceControl, EngineConfig, EngineContext, FlashError, FlashStorage, HttpResponse,
    HttpTransport, MemoryFlash, NetworkError, UiMessage, UiReceiver, UpdateOrchestrator,
};

pub const SERVER_URL: &str = "http://ota.test/v2/version/query";
pub const PACKAGE_URL: &str = "http://ota.test/files/v2.0.0.bin";

/// Loader partition used by every test; the flash device covers exactly it.
pub const LOADER_START: u32 = 0x1230_0000;
pub const LOADER_SIZE: u32 = 0x0010_0000;

/// Destinations for firmware images inside the test device.
pub const APP_ADDR: u32 = LOADER_START + 0x1_0000;
pub const RES_ADDR: u32 = LOADER_START + 0x4_0000;
pub const REGION_SIZE: u32 = 0x2_0000;

/// Manifest table of the test partition, one block below its end.
pub const MANIFEST_ADDR: u32 = LOADER_START + LOADER_SIZE - 0x1000;

// =============================================================================
// Transport
// =============================================================================

/// Canned answer for one URL.
#[derive(Clone)]
pub struct Scripted {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
    /// Largest slice handed out by a single `read`
    pub max_read: usize,
    pub gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
}

impl Scripted {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        Self {
            status: 200,
            content_length: Some(body.len() as u64),
            body,
            max_read: usize::MAX,
            gate: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_length: Some(0),
            body: Vec::new(),
            max_read: usize::MAX,
            gate: None,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = None;
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    pub fn trickle(mut self, max_read: usize) -> Self {
        self.max_read = max_read.max(1);
        self
    }

    /// Block the first read until the returned sender fires or is dropped.
    pub fn gated(mut self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Arc::new(Mutex::new(rx)));
        (self, tx)
    }
}

/// Serves scripted responses; unknown URLs fail to connect.
#[derive(Default)]
pub struct MemoryTransport {
    routes: Mutex<HashMap<String, Scripted>>,
    requests: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, response: Scripted) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl HttpTransport for MemoryTransport {
    fn get(&self, url: &str) -> Result<Box<dyn HttpResponse>, NetworkError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .routes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| NetworkError::Session(format!("connection refused: {url}")))?;
        Ok(Box::new(ScriptedResponse {
            status: scripted.status,
            content_length: scripted.content_length,
            max_read: scripted.max_read,
            gate: scripted.gate,
            body: Cursor::new(scripted.body),
        }))
    }
}

struct ScriptedResponse {
    status: u16,
    content_length: Option<u64>,
    max_read: usize,
    gate: Option<Arc<Mutex<mpsc::Receiver<()>>>>,
    body: Cursor<Vec<u8>>,
}

impl Read for ScriptedResponse {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.lock().unwrap().recv();
        }
        let len = buf.len().min(self.max_read);
        self.body.read(&mut buf[..len])
    }
}

impl HttpResponse for ScriptedResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    fn header(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("content-type") {
            return Some("application/octet-stream".to_string());
        }
        None
    }
}

// =============================================================================
// Flash
// =============================================================================

/// Misbehaviour of the driver for writes starting inside a range.
#[derive(Debug, Clone, Copy)]
pub enum WriteFault {
    /// Program only the first half and report that count
    Short,
    /// Report a driver error without touching the cells
    Fail,
}

/// Flash device that logs every program operation and can corrupt one byte
/// or inject write faults.
pub struct TestFlash {
    inner: MemoryFlash,
    writes: Mutex<Vec<(u32, usize)>>,
    corrupt_at: Option<u32>,
    fault: Option<(u32, u32, WriteFault)>,
}

impl TestFlash {
    pub fn new() -> Self {
        Self {
            inner: MemoryFlash::new(LOADER_START, LOADER_SIZE as usize),
            writes: Mutex::new(Vec::new()),
            corrupt_at: None,
            fault: None,
        }
    }

    /// Flip the low bit of whatever gets programmed at `addr`.
    pub fn corrupting(addr: u32) -> Self {
        Self {
            corrupt_at: Some(addr),
            ..Self::new()
        }
    }

    /// Apply `fault` to every write starting in `[start, start + len)`.
    pub fn faulting(start: u32, len: u32, fault: WriteFault) -> Self {
        Self {
            fault: Some((start, len, fault)),
            ..Self::new()
        }
    }

    /// `(addr, len)` of every write, in order.
    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.writes.lock().unwrap().clone()
    }

    /// Writes landing in `[start, start + len)`.
    pub fn writes_in(&self, start: u32, len: u32) -> Vec<(u32, usize)> {
        self.writes()
            .into_iter()
            .filter(|(addr, _)| *addr >= start && *addr < start + len)
            .collect()
    }

    pub fn snapshot(&self, addr: u32, len: usize) -> Vec<u8> {
        self.inner.snapshot(addr, len).unwrap()
    }
}

impl FlashStorage for TestFlash {
    fn erase_alignment(&self, addr: u32) -> u32 {
        self.inner.erase_alignment(addr)
    }

    fn erase(&self, addr: u32, len: u32) -> Result<(), FlashError> {
        self.inner.erase(addr, len)
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<usize, FlashError> {
        self.inner.read(addr, buf)
    }

    fn write(&self, addr: u32, data: &[u8]) -> Result<usize, FlashError> {
        self.writes.lock().unwrap().push((addr, data.len()));
        match self.fault {
            Some((start, len, WriteFault::Short)) if addr >= start && addr - start < len => {
                let half = data.len() / 2;
                return self.inner.write(addr, &data[..half]);
            }
            Some((start, len, WriteFault::Fail)) if addr >= start && addr - start < len => {
                return Err(FlashError::Io(std::io::Error::other("injected write fault")));
            }
            _ => {}
        }
        match self.corrupt_at {
            Some(bad) if bad >= addr && ((bad - addr) as usize) < data.len() => {
                let mut altered = data.to_vec();
                altered[(bad - addr) as usize] ^= 0x01;
                self.inner.write(addr, &altered)
            }
            _ => self.inner.write(addr, data),
        }
    }
}

// =============================================================================
// Device
// =============================================================================

#[derive(Default)]
pub struct RecordingDevice {
    pub restarted: AtomicBool,
}

impl DeviceControl for RecordingDevice {
    fn restart(&self) {
        self.restarted.store(true, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub orchestrator: UpdateOrchestrator,
    pub events: UiReceiver,
    pub flash: Arc<TestFlash>,
    pub transport: Arc<MemoryTransport>,
    pub device: Arc<RecordingDevice>,
}

impl Harness {
    pub fn new(flash: TestFlash) -> Self {
        let mut config = EngineConfig::default();
        config.server_url = SERVER_URL.to_string();
        config.current_version = "v1.5.0".to_string();
        config.partition.loader_start = LOADER_START;
        config.partition.loader_size = LOADER_SIZE;

        let flash = Arc::new(flash);
        let transport = Arc::new(MemoryTransport::new());
        let device = Arc::new(RecordingDevice::default());
        let (tx, rx) = mailbox(256);

        let ctx = EngineContext::new(config, flash.clone(), transport.clone(), tx)
            .unwrap()
            .with_device(device.clone());

        Self {
            orchestrator: UpdateOrchestrator::new(ctx),
            events: rx,
            flash,
            transport,
            device,
        }
    }

    /// Drain every queued interface message.
    pub fn drain(&mut self) -> Vec<UiMessage> {
        let mut out = Vec::new();
        self.events.poll(|msg| out.push(msg));
        out
    }
}

/// Deterministic firmware image of `len` bytes.
pub fn firmware(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
