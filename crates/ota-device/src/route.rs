//! Transport that picks a backend from the locator scheme.

use ota_engine::{
    FileTransport, HttpResponse, HttpTransport, NetworkConfig, NetworkError, ReqwestTransport,
};
use tracing::debug;

/// `file://` locators are served from disk, everything else over HTTP.
pub struct RoutingTransport {
    http: ReqwestTransport,
    file: FileTransport,
}

impl RoutingTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
        Ok(Self {
            http: ReqwestTransport::new(config)?,
            file: FileTransport::new(),
        })
    }
}

impl HttpTransport for RoutingTransport {
    fn get(&self, url: &str) -> Result<Box<dyn HttpResponse>, NetworkError> {
        if url.starts_with("file://") {
            debug!(url, "local locator");
            self.file.get(url)
        } else {
            self.http.get(url)
        }
    }
}
