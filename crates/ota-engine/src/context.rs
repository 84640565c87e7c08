//! Engine context: every collaborator an operation needs, built once at
//! startup and passed by reference.

use std::sync::Arc;

use crate::catalog::VersionCatalog;
use crate::config::EngineConfig;
use crate::error::OtaError;
use crate::events::UiSender;
use crate::layout::PartitionLayout;
use crate::manifest::FirmwareManifestStore;
use crate::storage::FlashStorage;
use crate::transport::HttpTransport;

/// Hook for the device-level restart offered after a successful update.
pub trait DeviceControl: Send + Sync {
    fn restart(&self);
}

/// Shared collaborators of the update engine.
pub struct EngineContext {
    pub config: EngineConfig,
    pub layout: PartitionLayout,
    pub storage: Arc<dyn FlashStorage>,
    pub transport: Arc<dyn HttpTransport>,
    pub events: UiSender,
    pub device: Option<Arc<dyn DeviceControl>>,
}

impl EngineContext {
    /// Validate `config` and derive the partition layout.
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn FlashStorage>,
        transport: Arc<dyn HttpTransport>,
        events: UiSender,
    ) -> Result<Self, OtaError> {
        config.validate()?;
        let layout = config.partition.layout()?;
        Ok(Self {
            config,
            layout,
            storage,
            transport,
            events,
            device: None,
        })
    }

    pub fn with_device(mut self, device: Arc<dyn DeviceControl>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn catalog(&self) -> VersionCatalog<'_> {
        VersionCatalog::new(&*self.storage, self.layout.catalog_addr())
    }

    pub fn manifest_store(&self) -> FirmwareManifestStore<'_> {
        FirmwareManifestStore::new(&*self.storage, self.layout.manifest_addr())
    }
}
