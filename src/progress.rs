//! Progress-callback trait for per-case synchronization events.
//!
//! Inject an [`Arc<dyn SyncProgressCallback>`] via
//! [`crate::config::SyncConfigBuilder::progress_callback`] to receive events
//! as the scheduler walks its batch. The CLI uses it to drive a terminal
//! progress bar; a service could forward the same events to a channel.
//!
//! # Example
//!
//! ```rust
//! use case_asset_sync::{SyncConfig, SyncProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     images: AtomicUsize,
//! }
//!
//! impl SyncProgressCallback for CountingCallback {
//!     fn on_case_complete(&self, case_id: &str, image_count: usize, image_errors: usize) {
//!         self.images.fetch_add(image_count, Ordering::SeqCst);
//!         eprintln!("{case_id}: {image_count} stored, {image_errors} skipped");
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { images: AtomicUsize::new(0) });
//!
//! let config = SyncConfig::builder()
//!     .progress_callback(counter as Arc<dyn SyncProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunReport;
use std::sync::Arc;

/// Called by the scheduler as it processes each case.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Cases are processed one at a time, but the trait is
/// `Send + Sync` so the callback can be shared with other tasks.
pub trait SyncProgressCallback: Send + Sync {
    /// Called once after the batch has been claimed.
    fn on_run_start(&self, total_cases: usize) {
        let _ = total_cases;
    }

    /// Called before a case's HTML is scanned.
    ///
    /// # Arguments
    /// * `case_id`: business identifier of the case
    /// * `index`: 1-based position in the batch
    /// * `total`: number of cases in the batch
    fn on_case_start(&self, case_id: &str, index: usize, total: usize) {
        let _ = (case_id, index, total);
    }

    /// Called when a case has been written to the ledger and marked completed.
    ///
    /// # Arguments
    /// * `image_count`: photos now in the ledger for this case
    /// * `image_errors`: photos that were skipped
    fn on_case_complete(&self, case_id: &str, image_count: usize, image_errors: usize) {
        let _ = (case_id, image_count, image_errors);
    }

    /// Called when a case was marked failed (timeout or case-level error).
    fn on_case_failed(&self, case_id: &str, error: &str) {
        let _ = (case_id, error);
    }

    /// Called when a claimed case is left alone because this run no longer
    /// holds its claim.
    fn on_case_skipped(&self, case_id: &str, reason: &str) {
        let _ = (case_id, reason);
    }

    /// Called after each bulk backup commit, successful or not.
    fn on_backup_flush(&self, images: usize, committed: bool) {
        let _ = (images, committed);
    }

    /// Called once after the batch has drained.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl SyncProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::SyncConfig`].
pub type ProgressCallback = Arc<dyn SyncProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started_total: AtomicUsize,
        starts: AtomicUsize,
        images: AtomicUsize,
        failures: AtomicUsize,
        flushed: AtomicUsize,
    }

    impl SyncProgressCallback for TrackingCallback {
        fn on_run_start(&self, total_cases: usize) {
            self.started_total.store(total_cases, Ordering::SeqCst);
        }

        fn on_case_start(&self, _case_id: &str, _index: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_case_complete(&self, _case_id: &str, image_count: usize, _image_errors: usize) {
            self.images.fetch_add(image_count, Ordering::SeqCst);
        }

        fn on_case_failed(&self, _case_id: &str, _error: &str) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_backup_flush(&self, images: usize, committed: bool) {
            if committed {
                self.flushed.fetch_add(images, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_run_start(3);
        cb.on_case_start("A1", 1, 3);
        cb.on_case_complete("A1", 2, 1);
        cb.on_case_failed("A2", "timed out");
        cb.on_backup_flush(2, true);
        cb.on_run_complete(&RunReport::default());
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_run_start(2);
        tracker.on_case_start("A1", 1, 2);
        tracker.on_case_complete("A1", 3, 0);
        tracker.on_case_start("A2", 2, 2);
        tracker.on_case_failed("A2", "timed out");
        tracker.on_backup_flush(3, true);
        tracker.on_backup_flush(5, false);

        assert_eq!(tracker.started_total.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.images.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.failures.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.flushed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn SyncProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_run_start(10);
        cb.on_case_complete("A1", 1, 0);
    }
}
