//! In-process store implementations.
//!
//! Same observable semantics as the production stores: claims are leased,
//! ledger replacement is all-or-nothing, object writes overwrite. Used by
//! the integration tests and by callers embedding the pipeline without
//! external services.

use super::{BackupStore, CaseRepository, ObjectStore};
use crate::error::{Result, SyncError};
use crate::model::{
    AssetId, AssetRecord, BackupItem, BackupProgress, BackupStatus, CaseRecord, CaseRowId,
    ClaimToken, NewAsset, ProcessingStatus, SyncProgress,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Case repository ──────────────────────────────────────────────────────

struct Claim {
    token: ClaimToken,
    until: Instant,
}

struct StoredCase {
    record: CaseRecord,
    html: Option<String>,
    claim: Option<Claim>,
}

impl StoredCase {
    fn selectable(&self) -> bool {
        self.record
            .status()
            .is_some_and(|s| ProcessingStatus::SELECTABLE.contains(&s))
    }
}

#[derive(Default)]
struct Ledger {
    cases: BTreeMap<CaseRowId, StoredCase>,
    assets: BTreeMap<AssetId, AssetRecord>,
    next_asset_id: AssetId,
}

/// [`CaseRepository`] held entirely in memory.
#[derive(Default)]
pub struct MemoryCaseRepository {
    inner: Mutex<Ledger>,
}

impl MemoryCaseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pending case.
    pub fn insert_case(
        &self,
        id: CaseRowId,
        case_id: &str,
        url_path: Option<&str>,
        html: Option<&str>,
    ) {
        lock(&self.inner).cases.insert(
            id,
            StoredCase {
                record: CaseRecord {
                    id,
                    case_id: case_id.to_string(),
                    url_path: url_path.map(str::to_string),
                    processing_status: ProcessingStatus::Pending.id(),
                    image_count: 0,
                },
                html: html.map(str::to_string),
                claim: None,
            },
        );
    }

    /// Token of the run currently holding the case, if any.
    pub fn claim_holder(&self, id: CaseRowId) -> Option<ClaimToken> {
        lock(&self.inner)
            .cases
            .get(&id)
            .and_then(|c| c.claim.as_ref().map(|claim| claim.token))
    }

    /// Current state of a case row.
    pub fn case(&self, id: CaseRowId) -> Option<CaseRecord> {
        lock(&self.inner).cases.get(&id).map(|c| c.record.clone())
    }

    /// Every asset row, lowest id first.
    pub fn all_assets(&self) -> Vec<AssetRecord> {
        lock(&self.inner).assets.values().cloned().collect()
    }
}

#[async_trait]
impl CaseRepository for MemoryCaseRepository {
    async fn claim_cases(
        &self,
        limit: usize,
        lease: Duration,
        token: ClaimToken,
    ) -> Result<Vec<CaseRecord>> {
        let now = Instant::now();
        let mut inner = lock(&self.inner);
        let mut claimed = Vec::new();
        for stored in inner.cases.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            let free = stored.claim.as_ref().map_or(true, |c| c.until <= now);
            if stored.selectable() && free && stored.record.url_path.is_some() {
                stored.claim = Some(Claim {
                    token,
                    until: now + lease,
                });
                claimed.push(stored.record.clone());
            }
        }
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        id: CaseRowId,
        token: ClaimToken,
        lease: Duration,
    ) -> Result<bool> {
        let mut inner = lock(&self.inner);
        let Some(stored) = inner.cases.get_mut(&id) else {
            return Ok(false);
        };
        if !stored.selectable() {
            return Ok(false);
        }
        match stored.claim.as_mut() {
            Some(claim) if claim.token == token => {
                claim.until = Instant::now() + lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_claimed(&self, id: CaseRowId, token: ClaimToken) -> Result<bool> {
        let mut inner = lock(&self.inner);
        let Some(stored) = inner.cases.get_mut(&id) else {
            return Ok(false);
        };
        if stored.claim.as_ref().map(|c| c.token) != Some(token) {
            return Ok(false);
        }
        stored.record.processing_status = ProcessingStatus::Failed.id();
        stored.record.image_count = 0;
        stored.claim = None;
        Ok(true)
    }

    async fn load_html(&self, ids: &[CaseRowId]) -> Result<HashMap<CaseRowId, String>> {
        let inner = lock(&self.inner);
        Ok(ids
            .iter()
            .filter_map(|id| {
                let html = inner.cases.get(id)?.html.clone()?;
                Some((*id, html))
            })
            .collect())
    }

    async fn set_case_status(
        &self,
        id: CaseRowId,
        status: ProcessingStatus,
        image_count: i32,
    ) -> Result<()> {
        let mut inner = lock(&self.inner);
        if let Some(stored) = inner.cases.get_mut(&id) {
            stored.record.processing_status = status.id();
            stored.record.image_count = image_count;
            stored.claim = None;
        }
        Ok(())
    }

    async fn complete_case(&self, case: &CaseRecord, assets: &[NewAsset]) -> Result<Vec<AssetId>> {
        let mut inner = lock(&self.inner);
        if !inner.cases.contains_key(&case.id) {
            return Err(SyncError::Internal(format!(
                "case row {} does not exist",
                case.id
            )));
        }

        inner.assets.retain(|_, a| a.case_id != case.case_id);

        let mut ids = Vec::with_capacity(assets.len());
        for asset in assets {
            inner.next_asset_id += 1;
            let id = inner.next_asset_id;
            inner.assets.insert(
                id,
                AssetRecord {
                    id,
                    case_id: case.case_id.clone(),
                    is_primary: asset.is_primary,
                    sort_order: asset.sort_order,
                    original_filename: asset.original_filename.clone(),
                    new_filename: asset.new_filename.clone(),
                    storage_path: asset.storage_path.clone(),
                    width: asset.width,
                    height: asset.height,
                    file_size: asset.file_size,
                    backup_status: BackupStatus::NotBackedUp.id(),
                    backup_path: None,
                },
            );
            ids.push(id);
        }

        if let Some(stored) = inner.cases.get_mut(&case.id) {
            stored.record.processing_status = ProcessingStatus::Completed.id();
            stored.record.image_count = assets.len() as i32;
            stored.claim = None;
        }
        Ok(ids)
    }

    async fn assets_for_case(&self, case_id: &str) -> Result<Vec<AssetRecord>> {
        let inner = lock(&self.inner);
        let mut rows: Vec<AssetRecord> = inner
            .assets
            .values()
            .filter(|a| a.case_id == case_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.sort_order);
        Ok(rows)
    }

    async fn set_backup_status(&self, ids: &[AssetId], status: BackupStatus) -> Result<()> {
        let mut inner = lock(&self.inner);
        for id in ids {
            if let Some(asset) = inner.assets.get_mut(id) {
                asset.backup_status = status.id();
                if status == BackupStatus::BackedUp && asset.backup_path.is_none() {
                    asset.backup_path = Some(asset.storage_path.clone());
                }
            }
        }
        Ok(())
    }

    async fn assets_pending_backup(
        &self,
        after: AssetId,
        limit: usize,
    ) -> Result<Vec<AssetRecord>> {
        let inner = lock(&self.inner);
        Ok(inner
            .assets
            .range(after + 1..)
            .map(|(_, a)| a)
            .filter(|a| {
                a.backup()
                    .is_some_and(|s| BackupStatus::RETRYABLE.contains(&s))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn progress(&self) -> Result<SyncProgress> {
        let inner = lock(&self.inner);
        let (mut total, mut completed, mut failed) = (0, 0, 0);
        for stored in inner.cases.values() {
            if stored.record.url_path.is_none() {
                continue;
            }
            total += 1;
            match stored.record.status() {
                Some(ProcessingStatus::Completed) => completed += 1,
                Some(ProcessingStatus::Failed) => failed += 1,
                _ => {}
            }
        }
        Ok(SyncProgress::from_counts(total, completed, failed))
    }

    async fn backup_progress(&self) -> Result<BackupProgress> {
        let inner = lock(&self.inner);
        let mut progress = BackupProgress::default();
        for asset in inner.assets.values() {
            match asset.backup() {
                Some(BackupStatus::NotBackedUp) => progress.not_backed_up += 1,
                Some(BackupStatus::BackedUp) => progress.backed_up += 1,
                Some(BackupStatus::Failed) => progress.failed += 1,
                None => {}
            }
        }
        Ok(progress)
    }
}

// ── Object store ─────────────────────────────────────────────────────────

/// [`ObjectStore`] over a `HashMap`.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<usize>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).get(key).cloned()
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Total `put` calls, overwrites included.
    pub fn put_count(&self) -> usize {
        *lock(&self.puts)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.objects).remove(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        lock(&self.objects).insert(key.to_string(), bytes.to_vec());
        *lock(&self.puts) += 1;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.object(key).ok_or_else(|| SyncError::ObjectStore {
            key: key.to_string(),
            detail: "no such object".to_string(),
        })
    }
}

// ── Backup store ─────────────────────────────────────────────────────────

/// [`BackupStore`] that records every commit.
#[derive(Default)]
pub struct MemoryBackupStore {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    commits: Mutex<Vec<(String, usize)>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.files).get(path).cloned()
    }

    /// `(message, item count)` of every successful commit, oldest first.
    pub fn commits(&self) -> Vec<(String, usize)> {
        lock(&self.commits).clone()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn commit(&self, items: &[BackupItem], message: &str) -> Result<()> {
        let mut files = lock(&self.files);
        for item in items {
            files.insert(item.path.clone(), item.buffer.clone());
        }
        lock(&self.commits).push((message.to_string(), items.len()));
        Ok(())
    }
}
