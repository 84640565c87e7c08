//! Configuration structures for the update engine.
//!
//! Defines where the version list is fetched from, which version is running,
//! where the update partition sits in flash, and how the network and the
//! interface mailbox behave.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::OtaError;
use crate::events::DEFAULT_MAILBOX_CAPACITY;
use crate::layout::PartitionLayout;

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout in seconds.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

/// Receive buffer size for the version query response.
const DEFAULT_MAX_QUERY_RESPONSE_BYTES: usize = 1024;

/// Main engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version query endpoint
    pub server_url: String,

    /// Version of the firmware currently running
    pub current_version: String,

    /// Update partition layout
    #[serde(default)]
    pub partition: PartitionConfig,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Interface mailbox configuration
    #[serde(default)]
    pub ui: UiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: "http://ota.sifli.com/v2/version/query".to_string(),
            current_version: "v1.0.0".to_string(),
            partition: PartitionConfig::default(),
            network: NetworkConfig::default(),
            ui: UiConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, OtaError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| OtaError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), OtaError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| OtaError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override fields from `OTA_SERVER_URL` and `OTA_CURRENT_VERSION`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("OTA_SERVER_URL") {
            debug!(url = %url, "server url from environment");
            self.server_url = url;
        }
        if let Ok(version) = std::env::var("OTA_CURRENT_VERSION") {
            debug!(version = %version, "current version from environment");
            self.current_version = version;
        }
    }

    pub fn validate(&self) -> Result<(), OtaError> {
        if self.server_url.trim().is_empty() {
            return Err(OtaError::Config("server_url must not be empty".to_string()));
        }
        if self.ui.mailbox_capacity == 0 {
            return Err(OtaError::Config(
                "ui.mailbox_capacity must be at least 1".to_string(),
            ));
        }
        self.partition.layout()?;
        Ok(())
    }
}

/// Location of the loader partition that holds the metadata tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    #[serde(default = "default_loader_start")]
    pub loader_start: u32,

    #[serde(default = "default_loader_size")]
    pub loader_size: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            loader_start: default_loader_start(),
            loader_size: default_loader_size(),
        }
    }
}

impl PartitionConfig {
    pub fn layout(&self) -> Result<PartitionLayout, OtaError> {
        PartitionLayout::new(self.loader_start, self.loader_size)
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Largest version query response accepted
    #[serde(default = "default_max_query_response")]
    pub max_query_response_bytes: usize,

    /// Host substitution applied to download locators
    #[serde(default)]
    pub locator_rewrite: Option<LocatorRewrite>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            user_agent: default_user_agent(),
            max_query_response_bytes: default_max_query_response(),
            locator_rewrite: None,
        }
    }
}

/// Replace the host a development server advertises with the public one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorRewrite {
    pub from: String,
    pub to: String,
}

impl LocatorRewrite {
    /// Substitute the first occurrence of `from` in `locator`.
    ///
    /// Returns `None` when `from` does not occur or the result would exceed
    /// `max_len` bytes.
    pub fn apply(&self, locator: &str, max_len: usize) -> Option<String> {
        if self.from.is_empty() {
            return None;
        }
        let pos = locator.find(&self.from)?;
        let rewritten = format!(
            "{}{}{}",
            &locator[..pos],
            self.to,
            &locator[pos + self.from.len()..]
        );
        (rewritten.len() <= max_len).then_some(rewritten)
    }
}

/// Interface mailbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Sleep between interface loop iterations, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

// Default value functions for serde

fn default_loader_start() -> u32 {
    0x1230_0000
}

fn default_loader_size() -> u32 {
    0x0010_0000
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}

fn default_user_agent() -> String {
    format!("ota-engine/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_query_response() -> usize {
    DEFAULT_MAX_QUERY_RESPONSE_BYTES
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_poll_interval() -> u64 {
    50
}
