//! Error types for the case-asset-sync library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`SyncError`]: **case- or run-level**. The case could not be finished
//!   (timeout, database failure) or a whole backup batch was given up on.
//!   A case that ends in a `SyncError` is marked failed and its ledger is
//!   left exactly as the previous run wrote it.
//!
//! * [`ImageError`]: **image-level**. One embedded photo could not be
//!   downloaded, decoded or stored. The case carries on with its other
//!   photos; the failure is recorded in [`crate::output::CaseReport`] and
//!   the photo is simply absent from the ledger.
//!
//! Nothing here is fatal to a batch. The scheduler logs, records and moves
//! on to the next case.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Case-level and run-level failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Case errors ───────────────────────────────────────────────────────
    /// The per-case pipeline did not finish inside its wall-clock budget.
    #[error("Case '{case_id}' timed out after {secs}s")]
    Timeout { case_id: String, secs: u64 },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Relational store failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The primary object store rejected a read or write.
    #[error("Object store error for '{key}': {detail}")]
    ObjectStore { key: String, detail: String },

    /// The backup mirror rejected a commit attempt.
    #[error("Backup store error: {0}")]
    BackupStore(String),

    /// A backup commit was still failing after the whole retry budget.
    #[error("Backup commit failed after {attempts} attempts: {detail}")]
    UploadBackup { attempts: u32, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single embedded photo.
///
/// Stored in [`crate::output::CaseReport::image_errors`]. The case is still
/// marked completed as long as the case pipeline itself finishes.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// Network failure or non-success HTTP status while fetching the source.
    #[error("Download failed for '{url}': {reason}")]
    Download { url: String, reason: String },

    /// The fetched bytes could not be decoded, resized or re-encoded.
    #[error("Decode failed for '{url}': {detail}")]
    Decode { url: String, detail: String },

    /// The primary store rejected the normalised image.
    #[error("Primary upload failed for '{key}': {detail}")]
    UploadPrimary { key: String, detail: String },
}

impl ImageError {
    /// Short category name used in logs and progress output.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageError::Download { .. } => "download",
            ImageError::Decode { .. } => "decode",
            ImageError::UploadPrimary { .. } => "upload-primary",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_display() {
        let e = SyncError::Timeout {
            case_id: "12345".into(),
            secs: 90,
        };
        let msg = e.to_string();
        assert!(msg.contains("12345"), "got: {msg}");
        assert!(msg.contains("90s"), "got: {msg}");
    }

    #[test]
    fn upload_backup_display() {
        let e = SyncError::UploadBackup {
            attempts: 3,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("3 attempts"));
        assert!(e.to_string().contains("HTTP 503"));
    }

    #[test]
    fn image_error_kinds() {
        let download = ImageError::Download {
            url: "https://host/a.jpg".into(),
            reason: "HTTP 404".into(),
        };
        let decode = ImageError::Decode {
            url: "https://host/a.jpg".into(),
            detail: "bad header".into(),
        };
        let upload = ImageError::UploadPrimary {
            key: "p/1/1-1.jpg".into(),
            detail: "denied".into(),
        };
        assert_eq!(download.kind(), "download");
        assert_eq!(decode.kind(), "decode");
        assert_eq!(upload.kind(), "upload-primary");
        assert!(upload.to_string().contains("p/1/1-1.jpg"));
    }

    #[test]
    fn image_error_serialises() {
        let e = ImageError::Download {
            url: "https://host/a.jpg".into(),
            reason: "timeout".into(),
        };
        let json = serde_json::to_string(&e).expect("serialise");
        assert!(json.contains("Download"));
        assert!(json.contains("timeout"));
    }
}
