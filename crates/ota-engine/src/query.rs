//! Version query: ask the server which firmware versions exist and persist
//! the ones newer than the running version.
//!
//! The server answers with
//!
//! ```json
//! { "result": 200, "data": [ { "name": "v2.0.0", "zippath": "http://..." } ] }
//! ```

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::catalog::{VersionCatalog, VersionEntry, LOCATOR_FIELD, MAX_VERSIONS};
use crate::config::LocatorRewrite;
use crate::error::{NetworkError, OtaError, ProtocolError};
use crate::package::read_full;
use crate::transport::HttpTransport;
use crate::version::{compare, VersionOrdering};

/// Status value a successful response carries in `result`.
const RESULT_OK: i64 = 200;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    result: Option<Value>,
    data: Option<Value>,
}

/// Parameters of one version query.
pub struct VersionQuery<'a> {
    pub server_url: &'a str,
    pub current_version: &'a str,
    pub max_response_bytes: usize,
    pub locator_rewrite: Option<&'a LocatorRewrite>,
}

impl<'a> VersionQuery<'a> {
    /// Fetch the version list, keep the newer entries and replace the catalog
    /// with them. Returns how many newer versions were found.
    pub fn run(
        &self,
        transport: &dyn HttpTransport,
        catalog: &VersionCatalog<'_>,
    ) -> Result<usize, OtaError> {
        info!(url = %self.server_url, current = %self.current_version, "querying versions");
        let body = self.fetch(transport)?;
        let entries = self.select(&body)?;

        catalog.replace_all(&entries)?;
        info!(count = entries.len(), "saved new versions");
        Ok(entries.len())
    }

    fn fetch(&self, transport: &dyn HttpTransport) -> Result<Vec<u8>, OtaError> {
        let mut response = transport.get(self.server_url)?;

        let status = response.status();
        if status != 200 {
            error!(status, "version query failed");
            return Err(NetworkError::Status { status }.into());
        }

        if let Some(length) = response.content_length() {
            if length > self.max_response_bytes as u64 {
                error!(length, limit = self.max_response_bytes, "version response too large");
                return Err(NetworkError::ResponseTooLarge {
                    length,
                    limit: self.max_response_bytes,
                }
                .into());
            }
        }

        // One extra byte tells an oversized chunked body from one that fits.
        let mut body = vec![0u8; self.max_response_bytes + 1];
        let got = read_full(&mut *response, &mut body)?;
        if got > self.max_response_bytes {
            return Err(NetworkError::ResponseTooLarge {
                length: got as u64,
                limit: self.max_response_bytes,
            }
            .into());
        }
        if got == 0 {
            return Err(ProtocolError::EmptyResponse.into());
        }
        body.truncate(got);
        debug!(body = %String::from_utf8_lossy(&body), "version response");
        Ok(body)
    }

    /// Decode the response body into the entries worth persisting.
    pub fn select(&self, body: &[u8]) -> Result<Vec<VersionEntry>, OtaError> {
        let response: QueryResponse = serde_json::from_slice(body)?;

        let result = response.result.as_ref().and_then(Value::as_i64);
        if result != Some(RESULT_OK) {
            let code = result.unwrap_or(-1);
            error!(result = code, "server returned error result");
            return Err(ProtocolError::ServerResult(code).into());
        }

        let items = match response.data {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProtocolError::MalformedResponse(
                    "data is missing or not an array".to_string(),
                )
                .into())
            }
        };

        let mut entries = Vec::new();
        for item in &items {
            if entries.len() >= MAX_VERSIONS {
                warn!(max = MAX_VERSIONS, "too many versions, keeping the first ones");
                break;
            }

            let (Some(name), Some(zippath)) = (
                item.get("name").and_then(Value::as_str),
                item.get("zippath").and_then(Value::as_str),
            ) else {
                debug!(item = %item, "skipping entry without name or zippath");
                continue;
            };

            if compare(name, self.current_version) != VersionOrdering::Greater {
                info!(name, current = %self.current_version, "skipping version not newer than current");
                continue;
            }

            let locator = self.rewrite(zippath);
            info!(slot = entries.len(), name, locator = %locator, "found version");
            entries.push(VersionEntry::new(name, &locator, true));
        }

        Ok(entries)
    }

    fn rewrite(&self, zippath: &str) -> String {
        self.locator_rewrite
            .and_then(|rewrite| rewrite.apply(zippath, LOCATOR_FIELD - 1))
            .unwrap_or_else(|| zippath.to_string())
    }
}
