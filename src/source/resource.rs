//! Trait abstraction for the append-only telemetry text resource

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{GroundStationError, Result};

/// Something the polling source can fetch in full on every tick
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextResource: Send + Sync {
    /// Fetch the whole resource as text
    async fn fetch(&self) -> Result<String>;

    /// Human-readable location for log lines
    fn describe(&self) -> String;
}

/// Telemetry file on the local filesystem, typically written by the radio bridge
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TextResource for FileResource {
    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| GroundStationError::SourceUnavailable(format!("{}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Telemetry file served over HTTP
pub struct HttpResource {
    client: reqwest::Client,
    url: String,
}

impl HttpResource {
    /// Build a client whose requests give up after `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TextResource for HttpResource {
    async fn fetch(&self) -> Result<String> {
        let text = self
            .client
            .get(&self.url)
            .header(reqwest::header::CACHE_CONTROL, "no-store")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(text)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Pick the resource implementation for a configured location
///
/// `http://` and `https://` locations are fetched over HTTP, anything else is
/// read as a local path.
pub fn resource_for(location: &str, timeout: Duration) -> Result<Box<dyn TextResource>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Ok(Box::new(HttpResource::new(location, timeout)?))
    } else {
        Ok(Box::new(FileResource::new(location)))
    }
}
