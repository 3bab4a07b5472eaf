//! Storage seams: the relational ledger, the primary object store and the
//! backup mirror.
//!
//! The scheduler and backup synchronizer only talk to these traits. Each
//! has a production implementation and an in-memory one used by tests and
//! dry runs:
//!
//! | Trait              | Production                                   | In-memory                 |
//! |--------------------|----------------------------------------------|---------------------------|
//! | [`CaseRepository`] | [`postgres::PgCaseRepository`]               | [`memory::MemoryCaseRepository`] |
//! | [`ObjectStore`]    | [`object::FilesystemObjectStore`], [`object::HttpObjectStore`] | [`memory::MemoryObjectStore`] |
//! | [`BackupStore`]    | [`hub::HubBackupStore`]                      | [`memory::MemoryBackupStore`] |

pub mod hub;
pub mod memory;
pub mod object;
pub mod postgres;

use crate::error::Result;
use crate::model::{
    AssetId, AssetRecord, BackupItem, BackupProgress, BackupStatus, CaseRecord, CaseRowId,
    ClaimToken, NewAsset, ProcessingStatus, SyncProgress,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Case rows and their asset ledger.
#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// Claim up to `limit` pending or failed cases that have a path fragment,
    /// lowest id first.
    ///
    /// Each claimed case is stamped with `token` and hidden from other
    /// claimers until its status is next written or `lease` elapses. Once a
    /// lease has elapsed another run may take the case over with its own
    /// token.
    async fn claim_cases(
        &self,
        limit: usize,
        lease: Duration,
        token: ClaimToken,
    ) -> Result<Vec<CaseRecord>>;

    /// Restart the lease on a case, but only while it is still claimed under
    /// `token` and not yet completed.
    ///
    /// Returns `false` when the claim was lost to another run or the case
    /// was finished in the meantime. The caller must then leave the case
    /// alone.
    async fn renew_claim(&self, id: CaseRowId, token: ClaimToken, lease: Duration)
        -> Result<bool>;

    /// Mark a case failed with `image_count = 0` and release the claim, but
    /// only while it is still claimed under `token`.
    ///
    /// Returns `false` when the claim is gone, e.g. because the ledger write
    /// for the case already went through.
    async fn fail_claimed(&self, id: CaseRowId, token: ClaimToken) -> Result<bool>;

    /// Fetch the stored HTML for each id. Ids without HTML are absent from
    /// the map.
    async fn load_html(&self, ids: &[CaseRowId]) -> Result<HashMap<CaseRowId, String>>;

    /// Set a case's processing status and image count and release its claim.
    async fn set_case_status(
        &self,
        id: CaseRowId,
        status: ProcessingStatus,
        image_count: i32,
    ) -> Result<()>;

    /// Atomically replace the case's asset rows with `assets` and mark it
    /// completed with `image_count = assets.len()`.
    ///
    /// Returns the new asset ids in the order of `assets`.
    async fn complete_case(&self, case: &CaseRecord, assets: &[NewAsset]) -> Result<Vec<AssetId>>;

    /// Current asset rows of a case, ordered by `sort_order`.
    async fn assets_for_case(&self, case_id: &str) -> Result<Vec<AssetRecord>>;

    /// Set the backup status of the given assets. Marking them backed up
    /// also fills `backup_path` from `storage_path` where it is still empty.
    async fn set_backup_status(&self, ids: &[AssetId], status: BackupStatus) -> Result<()>;

    /// Assets not yet backed up (status 0 or 2) with `id > after`, lowest id
    /// first.
    async fn assets_pending_backup(&self, after: AssetId, limit: usize)
        -> Result<Vec<AssetRecord>>;

    /// Processing counts over every case with a path fragment.
    async fn progress(&self) -> Result<SyncProgress>;

    /// Asset counts per backup status.
    async fn backup_progress(&self) -> Result<BackupProgress>;
}

/// The authoritative object store normalised photos are uploaded to.
///
/// Writes must be idempotent overwrites: re-putting a key replaces it.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// The secondary mirror. One `commit` call writes every item or none.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn commit(&self, items: &[BackupItem], message: &str) -> Result<()>;
}
