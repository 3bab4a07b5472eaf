//! Bulk mirroring of normalised photos to the backup store.
//!
//! A commit is all-or-nothing on the store side, so the status bookkeeping
//! is too: after a commit every contributing asset row is either
//! `BackedUp` or, once the retry budget is spent, `Failed`. Nothing is
//! dropped silently, and a failed row is simply picked up again by the next
//! [`BackupSynchronizer::reconcile`].
//!
//! Backup failures never propagate into case processing. [`commit`] reports
//! instead of erroring.
//!
//! [`commit`]: BackupSynchronizer::commit

use crate::config::RetryPolicy;
use crate::error::{Result, SyncError};
use crate::model::{AssetId, BackupItem, BackupStatus};
use crate::output::BackupReport;
use crate::progress::ProgressCallback;
use crate::store::{BackupStore, CaseRepository, ObjectStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Commit message for a scheduler flush.
pub fn commit_message(items: &[BackupItem]) -> String {
    let cases: HashSet<&str> = items.iter().map(|i| i.case_id.as_str()).collect();
    format!("Backup {} images from {} cases", items.len(), cases.len())
}

pub struct BackupSynchronizer {
    store: Arc<dyn BackupStore>,
    repo: Arc<dyn CaseRepository>,
    policy: RetryPolicy,
    progress: Option<ProgressCallback>,
}

impl BackupSynchronizer {
    pub fn new(
        store: Arc<dyn BackupStore>,
        repo: Arc<dyn CaseRepository>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            repo,
            policy,
            progress: None,
        }
    }

    /// Report every commit to `cb`.
    pub fn with_progress(mut self, cb: Option<ProgressCallback>) -> Self {
        self.progress = cb;
        self
    }

    /// Commit `items` as one batch, retrying per the policy, then record the
    /// outcome on every contributing asset row.
    ///
    /// An empty batch is a no-op.
    pub async fn commit(&self, items: &[BackupItem], message: &str) -> BackupReport {
        if items.is_empty() {
            return BackupReport::default();
        }

        let ids: Vec<AssetId> = items.iter().filter_map(|i| i.asset_id).collect();
        let mut report = BackupReport {
            batches: 1,
            ..BackupReport::default()
        };

        let max = self.policy.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=max {
            report.attempts = attempt;
            match self.store.commit(items, message).await {
                Ok(()) => {
                    info!(images = items.len(), attempt, "Backup commit succeeded");
                    report.committed = self.mark(&ids, BackupStatus::BackedUp).await;
                    self.notify(items.len(), true);
                    return report;
                }
                Err(e) => {
                    warn!(attempt, max, error = %e, "Backup commit failed");
                    last_error = e.to_string();
                    if attempt < max {
                        let delay = self.policy.delay_after(attempt);
                        debug!(delay_ms = delay.as_millis() as u64, "Retrying backup commit");
                        sleep(delay).await;
                    }
                }
            }
        }

        let err = SyncError::UploadBackup {
            attempts: max,
            detail: last_error,
        };
        error!(images = items.len(), error = %err, "Giving up on backup batch");
        report.failed = self.mark(&ids, BackupStatus::Failed).await;
        self.notify(items.len(), false);
        report
    }

    /// Mirror every asset row still waiting for a backup, oldest first, in
    /// pages of `page_size`.
    ///
    /// Buffers are re-read from the primary store; a row whose object cannot
    /// be read is marked `Failed`. Each row is visited at most once, so the
    /// run terminates even when every commit keeps failing.
    pub async fn reconcile(
        &self,
        primary: &dyn ObjectStore,
        page_size: usize,
        pause: Duration,
    ) -> Result<BackupReport> {
        let page_size = page_size.max(1);
        let mut report = BackupReport::default();
        let mut after: AssetId = 0;
        let mut page_no = 0usize;

        loop {
            let page = self.repo.assets_pending_backup(after, page_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = last.id;
            page_no += 1;

            let mut items = Vec::with_capacity(page.len());
            let mut unreadable = Vec::new();
            for asset in &page {
                match primary.get(&asset.storage_path).await {
                    Ok(buffer) => items.push(BackupItem {
                        asset_id: Some(asset.id),
                        case_id: asset.case_id.clone(),
                        path: asset.effective_backup_path().to_string(),
                        buffer,
                    }),
                    Err(e) => {
                        warn!(asset_id = asset.id, key = %asset.storage_path, error = %e,
                              "Primary object unreadable; marking backup failed");
                        unreadable.push(asset.id);
                    }
                }
            }

            if !unreadable.is_empty() {
                self.repo
                    .set_backup_status(&unreadable, BackupStatus::Failed)
                    .await?;
                report.failed += unreadable.len();
            }

            info!(page = page_no, images = items.len(), "Reconciling backup page");
            let message = format!("Reconcile batch {page_no}: {} images", items.len());
            report.merge(self.commit(&items, &message).await);

            if page.len() < page_size {
                break;
            }
            if !pause.is_zero() {
                sleep(pause).await;
            }
        }

        Ok(report)
    }

    /// Write `status` on `ids`, returning how many rows were marked.
    /// A failed write leaves the rows at their previous status.
    async fn mark(&self, ids: &[AssetId], status: BackupStatus) -> usize {
        if ids.is_empty() {
            return 0;
        }
        match self.repo.set_backup_status(ids, status).await {
            Ok(()) => ids.len(),
            Err(e) => {
                error!(rows = ids.len(), ?status, error = %e, "Could not record backup status");
                0
            }
        }
    }

    fn notify(&self, images: usize, committed: bool) {
        if let Some(cb) = &self.progress {
            cb.on_backup_flush(images, committed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backoff;
    use crate::model::NewAsset;
    use crate::store::memory::{MemoryBackupStore, MemoryCaseRepository, MemoryObjectStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` commits, then delegates.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        inner: MemoryBackupStore,
    }

    #[async_trait]
    impl BackupStore for Flaky {
        async fn commit(&self, items: &[BackupItem], message: &str) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(SyncError::BackupStore("HTTP 503".into()));
            }
            self.inner.commit(items, message).await
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
            inner: MemoryBackupStore::new(),
        })
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
        }
    }

    async fn seeded(n: i32) -> (Arc<MemoryCaseRepository>, Vec<BackupItem>) {
        let repo = Arc::new(MemoryCaseRepository::new());
        repo.insert_case(1, "C1", Some("p"), None);
        let case = repo.case(1).unwrap();
        let rows: Vec<NewAsset> = (1..=n)
            .map(|i| NewAsset {
                sort_order: i,
                is_primary: i == 1,
                original_filename: format!("{i}.jpg"),
                new_filename: format!("C1-{i}.jpg"),
                storage_path: format!("p/C1/C1-{i}.jpg"),
                width: 1,
                height: 1,
                file_size: 3,
            })
            .collect();
        let ids = repo.complete_case(&case, &rows).await.unwrap();
        let items = ids
            .iter()
            .zip(&rows)
            .map(|(id, row)| BackupItem {
                asset_id: Some(*id),
                case_id: "C1".into(),
                path: row.storage_path.clone(),
                buffer: b"jpg".to_vec(),
            })
            .collect();
        (repo, items)
    }

    fn statuses(repo: &MemoryCaseRepository) -> Vec<i16> {
        repo.all_assets().iter().map(|a| a.backup_status).collect()
    }

    #[tokio::test]
    async fn converges_after_transient_failures() {
        let (repo, items) = seeded(3).await;
        let store = flaky(2);
        let sync = BackupSynchronizer::new(store.clone(), repo.clone(), fast_policy(3));

        let report = sync.commit(&items, &commit_message(&items)).await;

        assert_eq!(report.attempts, 3);
        assert_eq!(report.committed, 3);
        assert_eq!(statuses(&repo), vec![1, 1, 1]);
        assert_eq!(store.inner.paths().len(), 3);
        assert!(repo.all_assets().iter().all(|a| a.backup_path.is_some()));
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed_without_error() {
        let (repo, items) = seeded(2).await;
        let store = flaky(u32::MAX);
        let sync = BackupSynchronizer::new(store.clone(), repo.clone(), fast_policy(3));

        let report = sync.commit(&items, "m").await;

        assert_eq!(report.attempts, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.committed, 0);
        assert_eq!(statuses(&repo), vec![2, 2]);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let (repo, _) = seeded(1).await;
        let store = flaky(0);
        let sync = BackupSynchronizer::new(store.clone(), repo, fast_policy(3));
        assert_eq!(sync.commit(&[], "m").await, BackupReport::default());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn untracked_items_are_mirrored_but_mark_nothing() {
        let (repo, mut items) = seeded(1).await;
        items[0].asset_id = None;
        let store = flaky(0);
        let sync = BackupSynchronizer::new(store.clone(), repo.clone(), fast_policy(1));

        let report = sync.commit(&items, "m").await;
        assert_eq!(report.committed, 0);
        assert_eq!(store.inner.paths(), vec!["p/C1/C1-1.jpg".to_string()]);
        assert_eq!(statuses(&repo), vec![0]);
    }

    #[test]
    fn message_counts_distinct_cases() {
        let item = |case: &str| BackupItem {
            asset_id: None,
            case_id: case.into(),
            path: "x".into(),
            buffer: vec![],
        };
        let items = vec![item("A"), item("A"), item("B")];
        assert_eq!(commit_message(&items), "Backup 3 images from 2 cases");
    }

    #[tokio::test]
    async fn reconcile_pages_through_pending_rows() {
        let (repo, items) = seeded(5).await;
        let primary = MemoryObjectStore::new();
        for item in &items[..4] {
            primary.put(&item.path, &item.buffer).await.unwrap();
        }
        // Row 5 has no primary object.
        let backup = Arc::new(MemoryBackupStore::new());
        let sync = BackupSynchronizer::new(backup.clone(), repo.clone(), fast_policy(1));

        let report = sync
            .reconcile(&primary, 2, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.committed, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.batches, 2);
        assert_eq!(statuses(&repo), vec![1, 1, 1, 1, 2]);
        assert_eq!(backup.commits().len(), 2);
    }

    #[tokio::test]
    async fn reconcile_terminates_when_store_always_fails() {
        let (repo, items) = seeded(3).await;
        let primary = MemoryObjectStore::new();
        for item in &items {
            primary.put(&item.path, &item.buffer).await.unwrap();
        }
        let store = flaky(u32::MAX);
        let sync = BackupSynchronizer::new(store.clone(), repo.clone(), fast_policy(2));

        let report = sync
            .reconcile(&primary, 2, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(report.failed, 3);
        assert_eq!(statuses(&repo), vec![2, 2, 2]);
        // Two pages, two attempts each.
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }
}
