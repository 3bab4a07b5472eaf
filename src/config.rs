//! Configuration types for a synchronization run.
//!
//! Every knob lives in [`SyncConfig`], built via its [`SyncConfigBuilder`].
//! The defaults reproduce the production settings: three cases per run,
//! a 90 s budget per case, 1000×1000 bounding box, quality 80, and three
//! backup attempts three seconds apart.

use crate::error::SyncError;
use crate::pipeline::transcode::TranscodeSettings;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Origin that relative photo references are resolved against.
pub const DEFAULT_BASE_ORIGIN: &str = "https://charleyproject.org";

/// Upper bound on a claim lease, whatever the case timeout.
pub const MAX_CLAIM_LEASE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration for one scheduler run.
///
/// # Example
/// ```rust
/// use case_asset_sync::SyncConfig;
///
/// let config = SyncConfig::builder()
///     .batch_size(20)
///     .case_timeout_secs(30)
///     .backup_flush_threshold(100)
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 20);
/// ```
#[derive(Clone)]
pub struct SyncConfig {
    /// Maximum number of cases claimed per run. Default: 3.
    pub batch_size: usize,

    /// Wall-clock budget for one case, download to ledger write. Default: 90 s.
    ///
    /// A case that exceeds it is marked failed with no ledger write and is
    /// picked up again by the next run.
    pub case_timeout: Duration,

    /// Per-request timeout for fetching a source photo. Default: 15 s.
    pub download_timeout: Duration,

    /// `User-Agent` header sent to the origin site.
    pub user_agent: String,

    /// Origin prepended to scheme-less photo references.
    pub base_origin: String,

    /// Bounding box edge in pixels; larger photos are shrunk to fit,
    /// smaller ones are left alone. Default: 1000.
    pub max_dimension: u32,

    /// JPEG quality, 1–100. Default: 80.
    pub quality: u8,

    /// Colour transparent pixels are flattened onto. Default: white.
    pub background: [u8; 3],

    /// Number of queued images that triggers a backup commit mid-run.
    /// Whatever is left is committed when the run drains. Default: 50.
    pub backup_flush_threshold: usize,

    /// Retry behaviour for bulk backup commits.
    pub backup_retry: RetryPolicy,

    /// Pause between pages of a backup reconciliation run. Default: 1 s.
    pub pause_between_pages: Duration,

    /// Slack added to `case_timeout` for a case's lease, covering the status
    /// write after a timeout. Default: 60 s.
    pub claim_margin: Duration,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            case_timeout: Duration::from_secs(90),
            download_timeout: Duration::from_secs(15),
            user_agent: format!("case-asset-sync/{}", env!("CARGO_PKG_VERSION")),
            base_origin: DEFAULT_BASE_ORIGIN.to_string(),
            max_dimension: 1000,
            quality: 80,
            background: [255, 255, 255],
            backup_flush_threshold: 50,
            backup_retry: RetryPolicy::default(),
            pause_between_pages: Duration::from_secs(1),
            claim_margin: Duration::from_secs(60),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("batch_size", &self.batch_size)
            .field("case_timeout", &self.case_timeout)
            .field("download_timeout", &self.download_timeout)
            .field("user_agent", &self.user_agent)
            .field("base_origin", &self.base_origin)
            .field("max_dimension", &self.max_dimension)
            .field("quality", &self.quality)
            .field("background", &self.background)
            .field("backup_flush_threshold", &self.backup_flush_threshold)
            .field("backup_retry", &self.backup_retry)
            .field("pause_between_pages", &self.pause_between_pages)
            .field("claim_margin", &self.claim_margin)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SyncProgressCallback>"),
            )
            .finish()
    }
}

impl SyncConfig {
    /// Create a new builder for `SyncConfig`.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder {
            config: Self::default(),
        }
    }

    /// Transcoder parameters derived from this config.
    pub fn transcode_settings(&self) -> TranscodeSettings {
        TranscodeSettings {
            max_dimension: self.max_dimension,
            quality: self.quality,
            background: self.background,
        }
    }

    /// How long one case stays invisible to other runs after its claim is
    /// taken or renewed.
    ///
    /// The scheduler renews the lease as each case starts, so it only has
    /// to cover a single case. Cases still waiting in the batch may outlive
    /// it; renewal then tells the scheduler whether another run took them.
    /// Saturates at [`MAX_CLAIM_LEASE`].
    pub fn claim_lease(&self) -> Duration {
        self.case_timeout
            .saturating_add(self.claim_margin)
            .min(MAX_CLAIM_LEASE)
    }
}

/// Builder for [`SyncConfig`].
#[derive(Debug)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn case_timeout(mut self, timeout: Duration) -> Self {
        self.config.case_timeout = timeout;
        self
    }

    pub fn case_timeout_secs(self, secs: u64) -> Self {
        self.case_timeout(Duration::from_secs(secs))
    }

    pub fn download_timeout(mut self, timeout: Duration) -> Self {
        self.config.download_timeout = timeout;
        self
    }

    pub fn download_timeout_secs(self, secs: u64) -> Self {
        self.download_timeout(Duration::from_secs(secs))
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn base_origin(mut self, origin: impl Into<String>) -> Self {
        self.config.base_origin = origin.into().trim_end_matches('/').to_string();
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn quality(mut self, q: u8) -> Self {
        self.config.quality = q.clamp(1, 100);
        self
    }

    pub fn background(mut self, rgb: [u8; 3]) -> Self {
        self.config.background = rgb;
        self
    }

    pub fn backup_flush_threshold(mut self, n: usize) -> Self {
        self.config.backup_flush_threshold = n.max(1);
        self
    }

    pub fn backup_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.backup_retry = policy;
        self
    }

    pub fn backup_max_attempts(mut self, n: u32) -> Self {
        self.config.backup_retry.max_attempts = n;
        self
    }

    pub fn backup_retry_delay(mut self, delay: Duration) -> Self {
        self.config.backup_retry.delay = delay;
        self
    }

    pub fn backup_backoff(mut self, backoff: Backoff) -> Self {
        self.config.backup_retry.backoff = backoff;
        self
    }

    pub fn pause_between_pages(mut self, pause: Duration) -> Self {
        self.config.pause_between_pages = pause;
        self
    }

    pub fn claim_margin(mut self, margin: Duration) -> Self {
        self.config.claim_margin = margin;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        let c = &self.config;
        if c.batch_size == 0 {
            return Err(SyncError::InvalidConfig("Batch size must be ≥ 1".into()));
        }
        if c.max_dimension == 0 {
            return Err(SyncError::InvalidConfig(
                "Bounding box must be at least 1 px".into(),
            ));
        }
        if c.backup_retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "Backup commits need at least one attempt".into(),
            ));
        }
        if c.case_timeout.is_zero() {
            return Err(SyncError::InvalidConfig(
                "Case timeout must be non-zero".into(),
            ));
        }
        if !c.base_origin.starts_with("http://") && !c.base_origin.starts_with("https://") {
            return Err(SyncError::InvalidConfig(format!(
                "Base origin must be an http(s) URL, got '{}'",
                c.base_origin
            )));
        }
        Ok(self.config)
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────

/// How the delay grows between backup commit attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry. (default)
    #[default]
    Fixed,
    /// `delay × n` before the n-th retry.
    Incremental,
}

/// Bounded retry budget for bulk backup commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Default: 3.
    pub max_attempts: u32,
    /// Base delay between attempts. Default: 3 s.
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Incremental => self.delay * attempt.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_settings() {
        let c = SyncConfig::default();
        assert_eq!(c.batch_size, 3);
        assert_eq!(c.case_timeout, Duration::from_secs(90));
        assert_eq!(c.max_dimension, 1000);
        assert_eq!(c.quality, 80);
        assert_eq!(c.background, [255, 255, 255]);
        assert_eq!(c.backup_retry.max_attempts, 3);
    }

    #[test]
    fn builder_rejects_zero_batch() {
        let err = SyncConfig::builder().batch_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Batch size"));
    }

    #[test]
    fn builder_rejects_zero_attempts() {
        assert!(SyncConfig::builder().backup_max_attempts(0).build().is_err());
    }

    #[test]
    fn builder_rejects_schemeless_origin() {
        assert!(SyncConfig::builder()
            .base_origin("charleyproject.org")
            .build()
            .is_err());
    }

    #[test]
    fn builder_clamps_quality_and_trims_origin() {
        let c = SyncConfig::builder()
            .quality(0)
            .base_origin("https://example.org/")
            .build()
            .unwrap();
        assert_eq!(c.quality, 1);
        assert_eq!(c.base_origin, "https://example.org");
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let p = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            backoff: Backoff::Fixed,
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(2), Duration::from_millis(500));
    }

    #[test]
    fn incremental_backoff_grows_linearly() {
        let p = RetryPolicy {
            max_attempts: 4,
            delay: Duration::from_millis(500),
            backoff: Backoff::Incremental,
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(500));
        assert_eq!(p.delay_after(3), Duration::from_millis(1500));
    }

    #[test]
    fn claim_lease_covers_one_case() {
        let c = SyncConfig::builder()
            .batch_size(4)
            .case_timeout_secs(10)
            .build()
            .unwrap();
        assert_eq!(c.claim_lease(), Duration::from_secs(70));

        let c = SyncConfig::builder()
            .case_timeout(Duration::from_millis(100))
            .claim_margin(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(c.claim_lease(), Duration::from_millis(100));
    }

    #[test]
    fn claim_lease_saturates_on_huge_inputs() {
        let c = SyncConfig::builder()
            .batch_size(usize::MAX)
            .case_timeout(Duration::MAX)
            .build()
            .unwrap();
        assert_eq!(c.claim_lease(), MAX_CLAIM_LEASE);

        let c = SyncConfig::builder()
            .batch_size(usize::MAX)
            .case_timeout_secs(u64::MAX / 2)
            .build()
            .unwrap();
        assert_eq!(c.claim_lease(), MAX_CLAIM_LEASE);
    }
}
