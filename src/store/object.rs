//! Primary object stores.
//!
//! * [`FilesystemObjectStore`]: objects are files under a root directory.
//!   Writes go to a temp file first and are renamed into place, so a
//!   reader never sees a half-written photo.
//! * [`HttpObjectStore`]: `PUT`/`GET {endpoint}/{key}` against any
//!   S3-compatible gateway or CDN origin that accepts bearer-token uploads.

use super::ObjectStore;
use crate::error::{Result, SyncError};
use crate::pipeline::keys::sanitize_storage_key;
use crate::pipeline::transcode::OUTPUT_MIME;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

fn object_err(key: &str, detail: impl Into<String>) -> SyncError {
    SyncError::ObjectStore {
        key: key.to_string(),
        detail: detail.into(),
    }
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// Objects stored as files below `root`.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key to a path that cannot escape `root`.
    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let clean = sanitize_storage_key(key);
        if clean.is_empty() {
            return Err(object_err(key, "empty storage key"));
        }
        Ok(self.root.join(clean))
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let full_path = self.full_path(key)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| object_err(key, format!("create {}: {e}", parent.display())))?;
        }

        let mut temp_name = full_path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        fs::write(&temp_path, bytes)
            .await
            .map_err(|e| object_err(key, format!("write {}: {e}", temp_path.display())))?;

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "Rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(object_err(key, format!("rename: {e}")));
        }

        debug!(key, bytes = bytes.len(), "Stored object on disk");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(key)?;
        fs::read(&full_path)
            .await
            .map_err(|e| object_err(key, format!("read {}: {e}", full_path.display())))
    }
}

// ── HTTP ─────────────────────────────────────────────────────────────────

/// Objects stored behind an HTTP endpoint.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.endpoint, sanitize_storage_key(key))
    }

    fn authorise(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let response = self
            .authorise(self.client.put(self.url(key)))
            .header(reqwest::header::CONTENT_TYPE, OUTPUT_MIME)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| object_err(key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(object_err(key, format!("HTTP {}", response.status())));
        }
        debug!(key, bytes = bytes.len(), "Uploaded object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .authorise(self.client.get(self.url(key)))
            .send()
            .await
            .map_err(|e| object_err(key, e.to_string()))?;

        if !response.status().is_success() {
            return Err(object_err(key, format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| object_err(key, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
