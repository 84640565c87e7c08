//! HTTP session primitives used by the version query and the package fetch.
//!
//! A response is a blocking byte stream plus the few header fields the engine
//! looks at. Dropping the response closes the session, so every exit path of
//! an attempt releases it.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use tracing::debug;

use crate::error::NetworkError;

/// An open response stream.
pub trait HttpResponse: Read + Send {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Declared body length, if the server sent one.
    fn content_length(&self) -> Option<u64>;

    /// Value of a response header.
    fn header(&self, name: &str) -> Option<String>;
}

/// Opens sessions against a locator.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<Box<dyn HttpResponse>, NetworkError>;
}

// ============================================================================
// reqwest
// ============================================================================

#[cfg(feature = "http")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "http")]
mod reqwest_transport {
    use std::io::Read;
    use std::time::Duration;

    use reqwest::blocking::{Client, Response};

    use super::{HttpResponse, HttpTransport};
    use crate::config::NetworkConfig;
    use crate::error::NetworkError;

    /// Blocking HTTP transport backed by reqwest.
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new(config: &NetworkConfig) -> Result<Self, NetworkError> {
            let client = Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .timeout(Duration::from_secs(config.read_timeout_secs))
                .user_agent(&config.user_agent)
                .build()?;
            Ok(Self { client })
        }
    }

    impl HttpTransport for ReqwestTransport {
        fn get(&self, url: &str) -> Result<Box<dyn HttpResponse>, NetworkError> {
            let response = self.client.get(url).send()?;
            Ok(Box::new(ReqwestResponse { inner: response }))
        }
    }

    struct ReqwestResponse {
        inner: Response,
    }

    impl Read for ReqwestResponse {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.inner.read(buf)
        }
    }

    impl HttpResponse for ReqwestResponse {
        fn status(&self) -> u16 {
            self.inner.status().as_u16()
        }

        fn content_length(&self) -> Option<u64> {
            self.inner.content_length()
        }

        fn header(&self, name: &str) -> Option<String> {
            self.inner
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        }
    }
}

// ============================================================================
// Local files
// ============================================================================

/// Serves `file://` locators from the local filesystem.
///
/// Missing files answer with status 404 so callers see the same failure
/// shape as a real server.
#[derive(Debug, Default, Clone)]
pub struct FileTransport;

impl FileTransport {
    pub fn new() -> Self {
        Self
    }

    fn path_of(url: &str) -> Option<PathBuf> {
        url.strip_prefix("file://").map(PathBuf::from)
    }
}

impl HttpTransport for FileTransport {
    fn get(&self, url: &str) -> Result<Box<dyn HttpResponse>, NetworkError> {
        let path = Self::path_of(url)
            .ok_or_else(|| NetworkError::Session(format!("unsupported locator: {url}")))?;

        match File::open(&path) {
            Ok(file) => {
                let len = file.metadata().map_err(NetworkError::Read)?.len();
                debug!(path = %path.display(), len, "serving local file");
                Ok(Box::new(FileResponse {
                    status: 200,
                    len: Some(len),
                    file: Some(file),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(FileResponse {
                status: 404,
                len: Some(0),
                file: None,
            })),
            Err(e) => Err(NetworkError::Session(e.to_string())),
        }
    }
}

struct FileResponse {
    status: u16,
    len: Option<u64>,
    file: Option<File>,
}

impl Read for FileResponse {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl HttpResponse for FileResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<u64> {
        self.len
    }

    fn header(&self, name: &str) -> Option<String> {
        if name.eq_ignore_ascii_case("content-length") {
            return self.len.map(|len| len.to_string());
        }
        if name.eq_ignore_ascii_case("content-type") && self.file.is_some() {
            return Some("application/octet-stream".to_string());
        }
        None
    }
}
