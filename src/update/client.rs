// ! Remote version client
// !
// ! Module is a thin HTTP+JSON accessor for the project download API. It
// ! never retries; a failed request just yields no result for this cycle.

use crate::core::error::{PlugError, PlugResult};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Connect and read timeout for every request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("modswap/", env!("CARGO_PKG_VERSION"));

/// Client for the remote version feed
#[derive(Debug, Clone)]
pub struct VersionClient {
    client: Client,
    base: String,
}

impl VersionClient {
    /// Create a client for `api_base`, e.g. `https://download.geysermc.org/v2/projects`
    pub fn new(api_base: &str) -> PlugResult<Self> {
        let parsed = Url::parse(api_base)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PlugError::config(format!(
                "unsupported API scheme '{}'",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PlugError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `{base}/{project}/versions/latest`
    pub fn latest_url(&self, project: &str) -> String {
        format!("{}/{}/versions/latest", self.base, project)
    }

    /// `{base}/{project}/versions/latest/builds/latest/downloads/{platform}`
    pub fn download_url(&self, project: &str, platform: &str) -> String {
        format!(
            "{}/{}/versions/latest/builds/latest/downloads/{}",
            self.base, project, platform
        )
    }

    /// Latest version string of `project`, or `None` if the feed gave no usable answer
    pub async fn latest_version(&self, project: &str) -> Option<String> {
        let url = self.latest_url(project);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Version request for {} failed: {}", project, e);
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            warn!("Version request for {} returned {}", project, response.status());
            return None;
        }

        let body = response.text().await.ok()?;
        if body.trim().is_empty() {
            debug!("Empty version response for {}", project);
            return None;
        }
        let json: Value = match serde_json::from_str(&body) {
            Ok(json) => json,
            Err(e) => {
                warn!("Malformed version response for {}: {}", project, e);
                return None;
            }
        };
        json.get("version")
            .and_then(Value::as_str)
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
    }

    /// Stream the latest build of `project` for `platform` into `dest`.
    ///
    /// Returns the number of bytes written. A partially written `dest` is
    /// left for the caller to clean up.
    pub async fn download_to(&self, project: &str, platform: &str, dest: &Path) -> PlugResult<u64> {
        let url = self.download_url(project, platform);
        let fail = |reason: String| PlugError::download_failed(project, reason);

        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(fail(format!("HTTP {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| fail(format!("{}: {e}", dest.display())))?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| fail(e.to_string()))? {
            file.write_all(&chunk)
                .await
                .map_err(|e| fail(e.to_string()))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| fail(e.to_string()))?;

        debug!("Downloaded {} bytes of {} to {}", written, project, dest.display());
        Ok(written)
    }
}
