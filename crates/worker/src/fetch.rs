//! Source file retrieval.
//!
//! Locators are either `http(s)://` URLs, `file://` URLs, or plain local
//! paths. Local paths are only served from a configured root directory and
//! must still resolve inside it after symlinks and `..` are followed;
//! without a root they are rejected. The run body bounds the whole fetch
//! with the configured timeout; the HTTP client carries the same bound for
//! connection setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use import_core::{Error, Result};
use tracing::{debug, warn};
use url::Url;

/// Retrieves the raw bytes of a source file.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Bytes>;
}

enum Locator {
    Remote(Url),
    Local(PathBuf),
}

fn resolve(locator: &str) -> Result<Locator> {
    let locator = locator.trim();
    if locator.is_empty() {
        return Err(Error::fetch("source locator is empty"));
    }

    match Url::parse(locator) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Locator::Remote(url)),
            "file" => url
                .to_file_path()
                .map(Locator::Local)
                .map_err(|_| Error::fetch(format!("invalid file URL '{}'", locator))),
            other => Err(Error::fetch(format!("unsupported scheme '{}'", other))),
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Locator::Local(PathBuf::from(locator))),
        Err(e) => Err(Error::fetch(format!("invalid source locator: {}", e))),
    }
}

/// Fetches over HTTP(S) with reqwest and from a confined local directory.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    local_root: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            max_bytes,
            local_root: None,
        })
    }

    /// Allows local sources under `root`.
    pub fn with_local_root(mut self, root: Option<PathBuf>) -> Self {
        self.local_root = root;
        self
    }

    fn too_large(&self) -> Error {
        Error::fetch(format!("source exceeds {} bytes", self.max_bytes))
    }

    async fn fetch_remote(&self, url: Url) -> Result<Bytes> {
        let mut response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::fetch(format!("request to {} timed out", url))
            } else {
                Error::fetch(format!("request to {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("{} responded with {}", url, status)));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(self.too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::fetch(format!("reading body from {} failed: {}", url, e)))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, bytes = body.len(), "Fetched remote source");
        Ok(body.freeze())
    }

    /// Resolves `path` against the local root, refusing anything outside it.
    async fn confine(&self, path: &Path) -> Result<PathBuf> {
        let Some(root) = &self.local_root else {
            return Err(Error::fetch(format!(
                "local source {} rejected: local sources are disabled",
                path.display()
            )));
        };
        let root = tokio::fs::canonicalize(root).await.map_err(|e| {
            Error::fetch(format!("local source root {} unavailable: {}", root.display(), e))
        })?;

        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            root.join(path)
        };
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|e| Error::fetch(format!("cannot read {}: {}", path.display(), e)))?;

        if !resolved.starts_with(&root) {
            warn!(path = %path.display(), "Rejected local source outside the source root");
            return Err(Error::fetch(format!(
                "local source {} is outside the allowed directory",
                path.display()
            )));
        }
        Ok(resolved)
    }

    async fn fetch_local(&self, path: &Path) -> Result<Bytes> {
        let path = self.confine(path).await?;
        let path = path.as_path();
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::fetch(format!("cannot read {}: {}", path.display(), e)))?;
        if !metadata.is_file() {
            return Err(Error::fetch(format!("{} is not a file", path.display())));
        }
        if metadata.len() > self.max_bytes as u64 {
            return Err(self.too_large());
        }

        let contents = tokio::fs::read(path)
            .await
            .map_err(|e| Error::fetch(format!("cannot read {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), bytes = contents.len(), "Read local source");
        Ok(Bytes::from(contents))
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Bytes> {
        match resolve(locator)? {
            Locator::Remote(url) => self.fetch_remote(url).await,
            Locator::Local(path) => self.fetch_local(&path).await,
        }
    }
}
