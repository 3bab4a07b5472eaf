//! The batch scheduler: one run claims a handful of cases and drives each
//! through extract → fetch → transcode → upload → ledger.
//!
//! ## Failure isolation
//!
//! Each case races its whole pipeline against [`SyncConfig::case_timeout`].
//! A timeout or any error escaping the case marks that case failed
//! (`image_count = 0`, ledger untouched) and the run moves on. Failed cases
//! are claimable again, so the next run retries them.
//!
//! ## Claims
//!
//! A run claims its batch under a fresh [`ClaimToken`]. Before a case
//! starts, its lease is renewed under that token for one
//! [`SyncConfig::claim_lease`]. If the renewal fails, another run took the
//! case over while this one was busy (for example in a long backup flush),
//! and the case is skipped. The failure write is also conditional on the
//! token. A timeout that fires after the ledger transaction committed
//! therefore cannot turn a completed case back into a failed one.
//!
//! Within a case, a photo that cannot be downloaded, decoded or uploaded is
//! skipped and reported. The case still completes with the photos that
//! made it.
//!
//! ## Backup queue
//!
//! Every photo that reached the primary store joins an in-memory queue,
//! even when its case fails afterwards. The queue is flushed through the
//! [`BackupSynchronizer`] whenever it holds at least
//! [`SyncConfig::backup_flush_threshold`] photos after a case finishes, and
//! once more when the run drains.

use crate::backup::{commit_message, BackupSynchronizer};
use crate::cache::HtmlCache;
use crate::config::SyncConfig;
use crate::error::{ImageError, Result, SyncError};
use crate::ledger::{AssetLedger, StoredImage};
use crate::model::{BackupItem, CaseRecord, ClaimToken, ProcessingStatus};
use crate::output::{CaseReport, RunReport};
use crate::pipeline::extract::extract_image_urls;
use crate::pipeline::fetch::ImageSource;
use crate::pipeline::keys::{asset_key, original_filename};
use crate::pipeline::transcode::{transcode, OUTPUT_EXTENSION};
use crate::store::{BackupStore, CaseRepository, ObjectStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What a case pipeline produced when it finished in time.
struct CaseOutcome {
    extracted: usize,
    image_count: usize,
}

pub struct BatchScheduler {
    config: SyncConfig,
    repo: Arc<dyn CaseRepository>,
    source: Arc<dyn ImageSource>,
    primary: Arc<dyn ObjectStore>,
    ledger: AssetLedger,
    backup: BackupSynchronizer,
}

impl BatchScheduler {
    pub fn new(
        config: SyncConfig,
        repo: Arc<dyn CaseRepository>,
        source: Arc<dyn ImageSource>,
        primary: Arc<dyn ObjectStore>,
        backup_store: Arc<dyn BackupStore>,
    ) -> Self {
        let backup = BackupSynchronizer::new(backup_store, repo.clone(), config.backup_retry)
            .with_progress(config.progress_callback.clone());
        Self {
            ledger: AssetLedger::new(repo.clone()),
            backup,
            config,
            repo,
            source,
            primary,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The synchronizer flushes go through, for reconciliation runs.
    pub fn backup(&self) -> &BackupSynchronizer {
        &self.backup
    }

    /// Claim one batch and process it to completion.
    ///
    /// Only a failure to claim the batch is returned as an error. Everything
    /// after that is recorded in the report.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        let cb = self.config.progress_callback.clone();

        match self.repo.progress().await {
            Ok(p) => info!(
                total = p.total,
                completed = p.completed,
                failed = p.failed,
                remaining = p.remaining,
                "Progress: {:.2}%",
                p.percent
            ),
            Err(e) => warn!(error = %e, "Could not read progress statistics"),
        }

        let token = ClaimToken::new_v4();
        let cases = self
            .repo
            .claim_cases(self.config.batch_size, self.config.claim_lease(), token)
            .await?;
        let total = cases.len();
        let mut report = RunReport {
            cases_claimed: total,
            ..RunReport::default()
        };

        if let Some(cb) = &cb {
            cb.on_run_start(total);
        }

        if cases.is_empty() {
            info!("No pending or failed cases left");
        } else {
            info!(cases = total, %token, "Claimed batch");
            self.process_batch(&cases, token, &mut report).await;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            completed = report.cases_completed,
            failed = report.cases_failed,
            skipped_cases = report.cases_skipped,
            images = report.images_stored,
            skipped = report.image_errors,
            backed_up = report.backup.committed,
            "Run finished in {}ms",
            report.duration_ms
        );
        if let Some(cb) = &cb {
            cb.on_run_complete(&report);
        }
        Ok(report)
    }

    async fn process_batch(
        &self,
        cases: &[CaseRecord],
        token: ClaimToken,
        report: &mut RunReport,
    ) {
        let cb = self.config.progress_callback.clone();
        let total = cases.len();

        let cache = HtmlCache::new(self.repo.clone());
        let ids: Vec<_> = cases.iter().map(|c| c.id).collect();
        if let Err(e) = cache.preload(&ids).await {
            warn!(error = %e, "HTML preload failed; reading per case");
        }

        let mut queue: Vec<BackupItem> = Vec::new();

        for (index, case) in cases.iter().enumerate() {
            if let Some(reason) = self.renew_claim(case, token).await {
                warn!(case_id = %case.case_id, reason, "Skipping case");
                if let Some(cb) = &cb {
                    cb.on_case_skipped(&case.case_id, reason);
                }
                report.cases_skipped += 1;
                continue;
            }

            info!(case_id = %case.case_id, "Processing case {}/{}", index + 1, total);
            if let Some(cb) = &cb {
                cb.on_case_start(&case.case_id, index + 1, total);
            }

            let case_started = Instant::now();
            let mut image_errors = Vec::new();
            let outcome = tokio::time::timeout(
                self.config.case_timeout,
                self.process_case(case, &cache, &mut queue, &mut image_errors),
            )
            .await
            .unwrap_or_else(|_| {
                Err(SyncError::Timeout {
                    case_id: case.case_id.clone(),
                    secs: self.config.case_timeout.as_secs(),
                })
            });

            let case_report = match outcome {
                Ok(done) => {
                    info!(
                        case_id = %case.case_id,
                        images = done.image_count,
                        skipped = image_errors.len(),
                        "Case completed"
                    );
                    if let Some(cb) = &cb {
                        cb.on_case_complete(&case.case_id, done.image_count, image_errors.len());
                    }
                    CaseReport {
                        case_id: case.case_id.clone(),
                        status: ProcessingStatus::Completed,
                        image_count: done.image_count,
                        extracted: done.extracted,
                        image_errors,
                        error: None,
                        duration_ms: case_started.elapsed().as_millis() as u64,
                    }
                }
                Err(e) => {
                    let mut case_report = self.fail_case(case, token, &e).await;
                    case_report.image_errors = image_errors;
                    case_report.duration_ms = case_started.elapsed().as_millis() as u64;
                    if let Some(cb) = &cb {
                        if case_report.is_completed() {
                            cb.on_case_complete(
                                &case.case_id,
                                case_report.image_count,
                                case_report.image_errors.len(),
                            );
                        } else {
                            cb.on_case_failed(&case.case_id, &e.to_string());
                        }
                    }
                    case_report
                }
            };
            report.record(case_report);

            if queue.len() >= self.config.backup_flush_threshold {
                self.flush(&mut queue, report).await;
            }
        }

        self.flush(&mut queue, report).await;
    }

    /// Run one case end to end. Photos that reach the primary store are
    /// pushed onto `queue` as they go, so they survive a later timeout.
    async fn process_case(
        &self,
        case: &CaseRecord,
        cache: &HtmlCache,
        queue: &mut Vec<BackupItem>,
        image_errors: &mut Vec<ImageError>,
    ) -> Result<CaseOutcome> {
        let html = cache.get(case.id).await?;
        let urls = extract_image_urls(html.as_deref().unwrap_or(""), &self.config.base_origin);

        if urls.is_empty() {
            info!(case_id = %case.case_id, "No photos referenced; completing with 0 images");
            self.ledger.replace(case, &[]).await?;
            return Ok(CaseOutcome {
                extracted: 0,
                image_count: 0,
            });
        }
        debug!(case_id = %case.case_id, urls = urls.len(), "Extracted photo URLs");

        let url_path = case.url_path.as_deref().unwrap_or("").trim_matches('/');
        let queued_from = queue.len();
        let mut stored: Vec<StoredImage> = Vec::with_capacity(urls.len());

        for url in &urls {
            let ordinal = stored.len() + 1;
            match self.store_image(case, url_path, url, ordinal).await {
                Ok((image, buffer)) => {
                    queue.push(BackupItem {
                        asset_id: None,
                        case_id: case.case_id.clone(),
                        path: image.key.storage_key.clone(),
                        buffer,
                    });
                    stored.push(image);
                }
                Err(e) => {
                    warn!(case_id = %case.case_id, url = %url, kind = e.kind(), error = %e, "Skipping photo");
                    image_errors.push(e);
                }
            }
        }

        let ids = self.ledger.replace(case, &stored).await?;
        for (item, id) in queue[queued_from..].iter_mut().zip(ids) {
            item.asset_id = Some(id);
        }

        Ok(CaseOutcome {
            extracted: urls.len(),
            image_count: stored.len(),
        })
    }

    /// Fetch, normalise and upload one photo.
    async fn store_image(
        &self,
        case: &CaseRecord,
        url_path: &str,
        url: &str,
        ordinal: usize,
    ) -> Result<(StoredImage, Vec<u8>), ImageError> {
        let bytes = self.source.fetch(url).await?;
        let image = transcode(url, bytes, self.config.transcode_settings()).await?;
        let key = asset_key(url_path, &case.case_id, ordinal, OUTPUT_EXTENSION);

        self.primary
            .put(&key.storage_key, &image.buffer)
            .await
            .map_err(|e| ImageError::UploadPrimary {
                key: key.storage_key.clone(),
                detail: e.to_string(),
            })?;
        debug!(case_id = %case.case_id, key = %key.storage_key, "Stored photo");

        Ok((
            StoredImage {
                ordinal,
                source_url: url.to_string(),
                original_filename: original_filename(url),
                key,
                width: image.width,
                height: image.height,
                byte_size: image.byte_size,
            },
            image.buffer,
        ))
    }

    /// Restart the case's lease. Returns why the case must be skipped, or
    /// `None` when this run still holds it.
    async fn renew_claim(&self, case: &CaseRecord, token: ClaimToken) -> Option<&'static str> {
        match self
            .repo
            .renew_claim(case.id, token, self.config.claim_lease())
            .await
        {
            Ok(true) => None,
            Ok(false) => Some("claim taken over by another run"),
            Err(e) => {
                warn!(case_id = %case.case_id, error = %e, "Could not renew claim");
                Some("could not renew claim")
            }
        }
    }

    /// Mark the case failed unless its ledger write already landed.
    ///
    /// The returned report has no image errors and a zero duration; the
    /// caller fills those in.
    async fn fail_case(
        &self,
        case: &CaseRecord,
        token: ClaimToken,
        err: &SyncError,
    ) -> CaseReport {
        let failed = CaseReport {
            case_id: case.case_id.clone(),
            status: ProcessingStatus::Failed,
            image_count: 0,
            extracted: 0,
            image_errors: Vec::new(),
            error: Some(err.to_string()),
            duration_ms: 0,
        };

        match self.repo.fail_claimed(case.id, token).await {
            Ok(true) => {
                error!(case_id = %case.case_id, error = %err, "Case failed");
                failed
            }
            Ok(false) => {
                // Only the ledger transaction clears our token inside the
                // lease, so it committed before the error surfaced. Its
                // asset ids never reached the queue; reconciliation mirrors
                // those rows.
                let image_count = match self.repo.assets_for_case(&case.case_id).await {
                    Ok(rows) => rows.len(),
                    Err(e) => {
                        warn!(case_id = %case.case_id, error = %e, "Could not read ledger");
                        0
                    }
                };
                warn!(
                    case_id = %case.case_id,
                    error = %err,
                    images = image_count,
                    "Ledger write landed before the error; keeping the case completed"
                );
                CaseReport {
                    status: ProcessingStatus::Completed,
                    image_count,
                    extracted: image_count,
                    error: None,
                    ..failed
                }
            }
            Err(e) => {
                // The claim lease expires on its own; the case is retried then.
                error!(case_id = %case.case_id, error = %err, "Case failed");
                error!(case_id = %case.case_id, error = %e, "Could not mark case failed");
                failed
            }
        }
    }

    async fn flush(&self, queue: &mut Vec<BackupItem>, report: &mut RunReport) {
        if queue.is_empty() {
            return;
        }
        let items = std::mem::take(queue);
        let message = commit_message(&items);
        info!(images = items.len(), "Flushing backup queue");
        report.backup.merge(self.backup.commit(&items, &message).await);
    }
}
