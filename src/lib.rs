//! # case-asset-sync
//!
//! Turn the photographs embedded in scraped case pages into normalised,
//! size-bounded image objects, record them in a per-case ledger, and mirror
//! them to a backup store. Every step is resumable: killing a run at any
//! point leaves statuses that the next run picks up from.
//!
//! ## Pipeline Overview
//!
//! ```text
//! cases (HTML)
//!  │
//!  ├─ 1. Claim      up to N pending/failed cases (SKIP LOCKED, per-run token)
//!  ├─ 2. Extract    photo URLs out of the stored HTML
//!  ├─ 3. Fetch      source bytes over HTTP (bounded timeout)
//!  ├─ 4. Transcode  fit 1000×1000, flatten onto white, JPEG q80 (spawn_blocking)
//!  ├─ 5. Upload     deterministic key in the primary object store
//!  ├─ 6. Ledger     replace the case's asset rows in one transaction
//!  └─ 7. Backup     bulk commit to the mirror, retried, per-row status
//! ```
//!
//! Steps 2–6 for one case race a wall-clock timeout (90 s by default). A
//! case that loses the race is marked failed and retried by a later run.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use case_asset_sync::store::hub::{HubBackupStore, DEFAULT_HUB_ENDPOINT};
//! use case_asset_sync::store::object::FilesystemObjectStore;
//! use case_asset_sync::store::postgres::PgCaseRepository;
//! use case_asset_sync::{BatchScheduler, HttpImageSource, SyncConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder().batch_size(10).build()?;
//!     let repo = Arc::new(PgCaseRepository::connect("postgres://localhost/cases", 4).await?);
//!     let source = Arc::new(HttpImageSource::new(config.download_timeout, &config.user_agent)?);
//!     let primary = Arc::new(FilesystemObjectStore::new("/srv/photos"));
//!     let backup = Arc::new(HubBackupStore::new(
//!         DEFAULT_HUB_ENDPOINT,
//!         "owner/case-photos",
//!         "hf_token",
//!         Duration::from_secs(120),
//!     )?);
//!
//!     let scheduler = BatchScheduler::new(config, repo, source, primary, backup);
//!     let report = scheduler.run().await?;
//!     eprintln!("{} cases, {} photos", report.cases_completed, report.images_stored);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `case-assets` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! case-asset-sync = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backup;
pub mod cache;
pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod scheduler;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backup::BackupSynchronizer;
pub use cache::HtmlCache;
pub use config::{
    Backoff, RetryPolicy, SyncConfig, SyncConfigBuilder, DEFAULT_BASE_ORIGIN, MAX_CLAIM_LEASE,
};
pub use error::{ImageError, SyncError};
pub use ledger::{AssetLedger, StoredImage};
pub use model::{
    AssetRecord, BackupItem, BackupProgress, BackupStatus, CaseRecord, ClaimToken,
    ProcessingStatus, SyncProgress,
};
pub use output::{BackupReport, CaseReport, RunReport};
pub use pipeline::extract::extract_image_urls;
pub use pipeline::fetch::{HttpImageSource, ImageSource};
pub use pipeline::keys::sanitize_storage_key;
pub use pipeline::transcode::{transcode, TranscodeSettings, TranscodedImage};
pub use progress::{NoopProgressCallback, ProgressCallback, SyncProgressCallback};
pub use scheduler::BatchScheduler;
pub use store::{BackupStore, CaseRepository, ObjectStore};
