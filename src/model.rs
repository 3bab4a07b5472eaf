//! Rows this pipeline reads and writes, plus the in-memory backup queue item.
//!
//! Status discriminants are the integers stored in the database; they must
//! never be renumbered.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Primary key of a case row.
pub type CaseRowId = i64;

/// Primary key of an asset row.
pub type AssetId = i64;

/// Status column type (SMALLINT).
pub type StatusId = i16;

/// Identifies the run holding a case claim. Each scheduler run draws a
/// fresh one; only the holder can renew or fail the claim.
pub type ClaimToken = Uuid;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a stored status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// `cases.processing_status`.
    ProcessingStatus {
        Pending = 0,
        Completed = 1,
        Failed = 2,
    }
}

define_status_enum! {
    /// `case_assets.backup_status`, tracked independently of processing.
    BackupStatus {
        NotBackedUp = 0,
        BackedUp = 1,
        Failed = 2,
    }
}

impl ProcessingStatus {
    /// Statuses the scheduler selects on every run. Failed cases are retried
    /// indefinitely by simply running again.
    pub const SELECTABLE: [ProcessingStatus; 2] =
        [ProcessingStatus::Pending, ProcessingStatus::Failed];
}

impl BackupStatus {
    /// Statuses a backup reconciliation run picks up.
    pub const RETRYABLE: [BackupStatus; 2] = [BackupStatus::NotBackedUp, BackupStatus::Failed];
}

/// A case row as claimed by the scheduler. The HTML blob is loaded
/// separately through [`crate::cache::HtmlCache`].
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct CaseRecord {
    pub id: CaseRowId,
    pub case_id: String,
    pub url_path: Option<String>,
    pub processing_status: StatusId,
    pub image_count: i32,
}

impl CaseRecord {
    pub fn status(&self) -> Option<ProcessingStatus> {
        ProcessingStatus::from_id(self.processing_status)
    }
}

/// A row from the `case_assets` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct AssetRecord {
    pub id: AssetId,
    pub case_id: String,
    pub is_primary: bool,
    pub sort_order: i32,
    pub original_filename: String,
    pub new_filename: String,
    pub storage_path: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
    pub backup_status: StatusId,
    pub backup_path: Option<String>,
}

impl AssetRecord {
    /// Where the backup copy lives; falls back to the primary storage key.
    pub fn effective_backup_path(&self) -> &str {
        self.backup_path.as_deref().unwrap_or(&self.storage_path)
    }

    pub fn backup(&self) -> Option<BackupStatus> {
        BackupStatus::from_id(self.backup_status)
    }
}

/// An asset row about to be inserted by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewAsset {
    pub sort_order: i32,
    pub is_primary: bool,
    pub original_filename: String,
    pub new_filename: String,
    pub storage_path: String,
    pub width: i32,
    pub height: i32,
    pub file_size: i64,
}

/// One normalised image waiting for the next bulk backup commit.
///
/// Lives only in memory. If the process dies before the commit, the asset
/// row keeps its previous `backup_status` and a reconciliation run rebuilds
/// the item from the primary store.
#[derive(Debug, Clone)]
pub struct BackupItem {
    /// Ledger row the buffer belongs to. `None` when the case failed before
    /// its ledger write: the object is still mirrored, but no row tracks it.
    pub asset_id: Option<AssetId>,
    pub case_id: String,
    pub path: String,
    pub buffer: Vec<u8>,
}

/// Aggregate processing progress over every case with a path fragment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub remaining: u64,
    pub percent: f64,
}

impl SyncProgress {
    pub fn from_counts(total: u64, completed: u64, failed: u64) -> Self {
        let percent = if total > 0 {
            completed as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        Self {
            total,
            completed,
            failed,
            remaining: total.saturating_sub(completed),
            percent,
        }
    }
}

/// Asset counts per backup status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupProgress {
    pub not_backed_up: u64,
    pub backed_up: u64,
    pub failed: u64,
}
