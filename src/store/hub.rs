//! Backup mirror on a Hugging Face dataset repository.
//!
//! One [`BackupStore::commit`] is one hub commit: a single NDJSON request
//! whose first line is the commit header and every following line is one
//! base64-encoded file. The hub applies the commit atomically, so a batch is
//! either fully mirrored or not at all.

use super::BackupStore;
use crate::error::{Result, SyncError};
use crate::model::BackupItem;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Default hub API endpoint.
pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";

/// Commits batches of normalised photos to a dataset repository.
pub struct HubBackupStore {
    client: reqwest::Client,
    endpoint: String,
    repo: String,
    revision: String,
    token: String,
}

impl HubBackupStore {
    /// Create a store for dataset `repo` (`owner/name`) on `endpoint`.
    pub fn new(endpoint: &str, repo: &str, token: &str, timeout: Duration) -> Result<Self> {
        if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
            return Err(SyncError::InvalidConfig(format!(
                "Hub repository must look like 'owner/name', got '{repo}'"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            repo: repo.trim_matches('/').to_string(),
            revision: "main".to_string(),
            token: token.to_string(),
        })
    }

    /// Commit to a branch other than `main`.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    fn commit_url(&self) -> String {
        format!(
            "{}/api/datasets/{}/commit/{}",
            self.endpoint, self.repo, self.revision
        )
    }
}

/// Build the NDJSON commit body.
pub(crate) fn commit_body(items: &[BackupItem], message: &str) -> String {
    let mut lines = Vec::with_capacity(items.len() + 1);
    lines.push(
        json!({
            "key": "header",
            "value": { "summary": message, "description": "" }
        })
        .to_string(),
    );
    for item in items {
        lines.push(
            json!({
                "key": "file",
                "value": {
                    "content": general_purpose::STANDARD.encode(&item.buffer),
                    "path": item.path,
                    "encoding": "base64"
                }
            })
            .to_string(),
        );
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

#[async_trait]
impl BackupStore for HubBackupStore {
    async fn commit(&self, items: &[BackupItem], message: &str) -> Result<()> {
        let body = commit_body(items, message);
        let response = self
            .client
            .post(self.commit_url())
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::BackupStore(format!("hub commit request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SyncError::BackupStore(format!(
                "hub commit rejected: HTTP {status}: {}",
                detail.chars().take(300).collect::<String>()
            )));
        }

        debug!(repo = %self.repo, files = items.len(), "Hub commit accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(path: &str, bytes: &[u8]) -> BackupItem {
        BackupItem {
            asset_id: Some(1),
            case_id: "C1".into(),
            path: path.into(),
            buffer: bytes.to_vec(),
        }
    }

    #[test]
    fn body_has_header_then_one_line_per_file() {
        let body = commit_body(
            &[item("p/C1/C1-1.jpg", b"abc"), item("p/C1/C1-2.jpg", b"de")],
            "Backup 2 images from 1 cases",
        );
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["key"], "header");
        assert_eq!(lines[0]["value"]["summary"], "Backup 2 images from 1 cases");
        assert_eq!(lines[1]["key"], "file");
        assert_eq!(lines[1]["value"]["path"], "p/C1/C1-1.jpg");
        assert_eq!(lines[1]["value"]["content"], "YWJj");
        assert_eq!(lines[2]["value"]["encoding"], "base64");
    }

    #[test]
    fn rejects_malformed_repo() {
        assert!(
            HubBackupStore::new(DEFAULT_HUB_ENDPOINT, "justname", "t", Duration::from_secs(5))
                .is_err()
        );
        let store =
            HubBackupStore::new("https://hub.test/", "owner/photos", "t", Duration::from_secs(5))
                .unwrap()
                .with_revision("mirror");
        assert_eq!(
            store.commit_url(),
            "https://hub.test/api/datasets/owner/photos/commit/mirror"
        );
    }
}
