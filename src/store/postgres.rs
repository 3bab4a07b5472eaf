//! Postgres-backed [`CaseRepository`].
//!
//! Tables (only the columns this crate touches):
//!
//! ```sql
//! cases (id BIGINT PK, case_id TEXT, case_html TEXT, url_path TEXT,
//!        processing_status SMALLINT, image_count INT,
//!        claimed_at TIMESTAMPTZ, claim_token UUID)
//! case_assets (id BIGSERIAL PK, case_id TEXT, is_primary BOOL, sort_order INT,
//!              original_filename TEXT, new_filename TEXT, storage_path TEXT,
//!              width INT, height INT, file_size BIGINT,
//!              backup_status SMALLINT, backup_path TEXT)
//! ```

use super::CaseRepository;
use crate::error::Result;
use crate::model::{
    AssetId, AssetRecord, BackupProgress, BackupStatus, CaseRecord, CaseRowId, ClaimToken,
    NewAsset, ProcessingStatus, StatusId, SyncProgress,
};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Column list for `cases` queries.
const CASE_COLUMNS: &str = "id, case_id, url_path, processing_status, image_count";

/// Column list for `case_assets` queries.
const ASSET_COLUMNS: &str = "\
    id, case_id, is_primary, sort_order, original_filename, new_filename, \
    storage_path, width, height, file_size, backup_status, backup_path";

/// Statuses the claim query selects.
const SELECTABLE_STATUSES: [StatusId; 2] = [
    ProcessingStatus::Pending as StatusId,
    ProcessingStatus::Failed as StatusId,
];

/// Backup statuses a reconciliation run picks up.
const RETRYABLE_BACKUP_STATUSES: [StatusId; 2] = [
    BackupStatus::NotBackedUp as StatusId,
    BackupStatus::Failed as StatusId,
];

/// Case repository over a shared connection pool.
#[derive(Clone)]
pub struct PgCaseRepository {
    pool: PgPool,
}

impl PgCaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CaseRepository for PgCaseRepository {
    /// Uses `SELECT ... FOR UPDATE SKIP LOCKED` plus a `claimed_at` lease so
    /// overlapping runs never pick the same case.
    async fn claim_cases(
        &self,
        limit: usize,
        lease: Duration,
        token: ClaimToken,
    ) -> Result<Vec<CaseRecord>> {
        let query = format!(
            "UPDATE cases SET claimed_at = NOW(), claim_token = $4 \
             WHERE id IN ( \
                 SELECT id FROM cases \
                 WHERE processing_status = ANY($1) \
                   AND url_path IS NOT NULL \
                   AND (claimed_at IS NULL \
                        OR claimed_at < NOW() - make_interval(secs => $2)) \
                 ORDER BY id ASC \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {CASE_COLUMNS}"
        );
        let mut cases = sqlx::query_as::<_, CaseRecord>(&query)
            .bind(&SELECTABLE_STATUSES[..])
            .bind(lease.as_secs_f64())
            .bind(limit as i64)
            .bind(token)
            .fetch_all(&self.pool)
            .await?;
        // RETURNING order is unspecified.
        cases.sort_by_key(|c| c.id);
        debug!(claimed = cases.len(), "Claimed cases");
        Ok(cases)
    }

    async fn renew_claim(
        &self,
        id: CaseRowId,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cases SET claimed_at = NOW() \
             WHERE id = $1 AND claim_token = $2 AND processing_status = ANY($3)",
        )
        .bind(id)
        .bind(token)
        .bind(&SELECTABLE_STATUSES[..])
        .execute(&self.pool)
        .await?;
        let renewed = result.rows_affected() == 1;
        debug!(id, renewed, lease_secs = lease.as_secs_f64(), "Renewed claim");
        Ok(renewed)
    }

    async fn fail_claimed(&self, id: CaseRowId, token: ClaimToken) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE cases \
             SET processing_status = $3, image_count = 0, claimed_at = NULL, claim_token = NULL \
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(id)
        .bind(token)
        .bind(ProcessingStatus::Failed.id())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_html(&self, ids: &[CaseRowId]) -> Result<HashMap<CaseRowId, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, (CaseRowId, String)>(
            "SELECT id, case_html FROM cases WHERE id = ANY($1) AND case_html IS NOT NULL",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    async fn set_case_status(
        &self,
        id: CaseRowId,
        status: ProcessingStatus,
        image_count: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE cases \
             SET processing_status = $2, image_count = $3, claimed_at = NULL, claim_token = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.id())
        .bind(image_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_case(&self, case: &CaseRecord, assets: &[NewAsset]) -> Result<Vec<AssetId>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM case_assets WHERE case_id = $1")
            .bind(&case.case_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(assets.len());
        for asset in assets {
            let id: AssetId = sqlx::query_scalar(
                "INSERT INTO case_assets \
                     (case_id, is_primary, sort_order, original_filename, new_filename, \
                      storage_path, width, height, file_size, backup_status) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 RETURNING id",
            )
            .bind(&case.case_id)
            .bind(asset.is_primary)
            .bind(asset.sort_order)
            .bind(&asset.original_filename)
            .bind(&asset.new_filename)
            .bind(&asset.storage_path)
            .bind(asset.width)
            .bind(asset.height)
            .bind(asset.file_size)
            .bind(BackupStatus::NotBackedUp.id())
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        sqlx::query(
            "UPDATE cases \
             SET processing_status = $2, image_count = $3, claimed_at = NULL, claim_token = NULL \
             WHERE id = $1",
        )
        .bind(case.id)
        .bind(ProcessingStatus::Completed.id())
        .bind(assets.len() as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ids)
    }

    async fn assets_for_case(&self, case_id: &str) -> Result<Vec<AssetRecord>> {
        let query = format!(
            "SELECT {ASSET_COLUMNS} FROM case_assets WHERE case_id = $1 ORDER BY sort_order ASC"
        );
        let rows = sqlx::query_as::<_, AssetRecord>(&query)
            .bind(case_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn set_backup_status(&self, ids: &[AssetId], status: BackupStatus) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        if status == BackupStatus::BackedUp {
            sqlx::query(
                "UPDATE case_assets \
                 SET backup_status = $2, backup_path = COALESCE(backup_path, storage_path) \
                 WHERE id = ANY($1)",
            )
            .bind(ids)
            .bind(status.id())
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE case_assets SET backup_status = $2 WHERE id = ANY($1)")
                .bind(ids)
                .bind(status.id())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn assets_pending_backup(
        &self,
        after: AssetId,
        limit: usize,
    ) -> Result<Vec<AssetRecord>> {
        let query = format!(
            "SELECT {ASSET_COLUMNS} FROM case_assets \
             WHERE backup_status = ANY($1) AND id > $2 \
             ORDER BY id ASC \
             LIMIT $3"
        );
        let rows = sqlx::query_as::<_, AssetRecord>(&query)
            .bind(&RETRYABLE_BACKUP_STATUSES[..])
            .bind(after)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn progress(&self) -> Result<SyncProgress> {
        let (total, completed, failed) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT COUNT(*), \
                    COUNT(*) FILTER (WHERE processing_status = $1), \
                    COUNT(*) FILTER (WHERE processing_status = $2) \
             FROM cases WHERE url_path IS NOT NULL",
        )
        .bind(ProcessingStatus::Completed.id())
        .bind(ProcessingStatus::Failed.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(SyncProgress::from_counts(
            total as u64,
            completed as u64,
            failed as u64,
        ))
    }

    async fn backup_progress(&self) -> Result<BackupProgress> {
        let (not_backed_up, backed_up, failed) = sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT COUNT(*) FILTER (WHERE backup_status = $1), \
                    COUNT(*) FILTER (WHERE backup_status = $2), \
                    COUNT(*) FILTER (WHERE backup_status = $3) \
             FROM case_assets",
        )
        .bind(BackupStatus::NotBackedUp.id())
        .bind(BackupStatus::BackedUp.id())
        .bind(BackupStatus::Failed.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(BackupProgress {
            not_backed_up: not_backed_up as u64,
            backed_up: backed_up as u64,
            failed: failed as u64,
        })
    }
}
