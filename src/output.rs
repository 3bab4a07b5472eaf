//! Result types returned by scheduler and backup runs.
//!
//! All of them serialise to JSON so the CLI can print a machine-readable
//! summary with `--json`.

use crate::error::ImageError;
use crate::model::ProcessingStatus;
use serde::Serialize;

/// Outcome of one case within a run.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub case_id: String,
    pub status: ProcessingStatus,
    /// Photos now in the ledger for this case.
    pub image_count: usize,
    /// Photos extracted from the HTML, duplicates removed.
    pub extracted: usize,
    /// Photos skipped because of an image-level failure.
    pub image_errors: Vec<ImageError>,
    /// Case-level failure, when `status` is `Failed`.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CaseReport {
    pub fn is_completed(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}

/// Outcome of one or more bulk backup commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackupReport {
    /// Commits attempted (not counting retries).
    pub batches: usize,
    /// Asset rows now marked backed up.
    pub committed: usize,
    /// Asset rows now marked backup-failed.
    pub failed: usize,
    /// Commit attempts including retries.
    pub attempts: u32,
}

impl BackupReport {
    pub fn merge(&mut self, other: BackupReport) {
        self.batches += other.batches;
        self.committed += other.committed;
        self.failed += other.failed;
        self.attempts += other.attempts;
    }
}

/// Summary of one scheduler run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub cases_claimed: usize,
    pub cases_completed: usize,
    pub cases_failed: usize,
    /// Claimed cases another run took over before this run reached them.
    pub cases_skipped: usize,
    pub images_stored: usize,
    pub image_errors: usize,
    pub backup: BackupReport,
    pub cases: Vec<CaseReport>,
    pub duration_ms: u64,
}

impl RunReport {
    pub(crate) fn record(&mut self, case: CaseReport) {
        if case.is_completed() {
            self.cases_completed += 1;
            self.images_stored += case.image_count;
        } else {
            self.cases_failed += 1;
        }
        self.image_errors += case.image_errors.len();
        self.cases.push(case);
    }
}
