//! The per-case asset ledger.
//!
//! A case's asset rows are only ever written as a whole set: every run
//! replaces whatever the previous run stored, inside one transaction, so a
//! case never ends up with a mix of old and new rows or duplicated ordinals.

use crate::error::Result;
use crate::model::{AssetId, CaseRecord, NewAsset};
use crate::pipeline::keys::AssetKey;
use crate::store::CaseRepository;
use std::sync::Arc;
use tracing::debug;

/// A photo that made it through transcoding and primary upload.
#[derive(Debug, Clone)]
pub struct StoredImage {
    /// 1-based position among the case's successful photos.
    pub ordinal: usize,
    pub source_url: String,
    pub original_filename: String,
    pub key: AssetKey,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
}

impl StoredImage {
    fn to_row(&self) -> NewAsset {
        NewAsset {
            sort_order: self.ordinal as i32,
            is_primary: self.ordinal == 1,
            original_filename: self.original_filename.clone(),
            new_filename: self.key.file_name.clone(),
            storage_path: self.key.storage_key.clone(),
            width: self.width as i32,
            height: self.height as i32,
            file_size: self.byte_size as i64,
        }
    }
}

pub struct AssetLedger {
    repo: Arc<dyn CaseRepository>,
}

impl AssetLedger {
    pub fn new(repo: Arc<dyn CaseRepository>) -> Self {
        Self { repo }
    }

    /// Ledger rows for `images`, in the order given.
    pub fn rows(images: &[StoredImage]) -> Vec<NewAsset> {
        images.iter().map(StoredImage::to_row).collect()
    }

    /// Replace the case's asset set with `images` and mark the case
    /// completed. An empty slice clears the case's rows.
    ///
    /// Returns the new asset ids, parallel to `images`.
    pub async fn replace(&self, case: &CaseRecord, images: &[StoredImage]) -> Result<Vec<AssetId>> {
        let rows = Self::rows(images);
        let ids = self.repo.complete_case(case, &rows).await?;
        debug!(case_id = %case.case_id, rows = ids.len(), "Replaced asset ledger");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::keys::asset_key;
    use crate::store::memory::MemoryCaseRepository;

    fn stored(ordinal: usize) -> StoredImage {
        StoredImage {
            ordinal,
            source_url: format!("https://h/{ordinal}.jpg"),
            original_filename: format!("{ordinal}.jpg"),
            key: asset_key("doe", "C9", ordinal, "jpg"),
            width: 800,
            height: 600,
            byte_size: 4096,
        }
    }

    #[test]
    fn only_first_row_is_primary() {
        let rows = AssetLedger::rows(&[stored(1), stored(2), stored(3)]);
        let primaries: Vec<_> = rows.iter().filter(|r| r.is_primary).collect();
        assert_eq!(primaries.len(), 1);
        assert_eq!(primaries[0].sort_order, 1);
        assert_eq!(rows[2].storage_path, "doe/C9/C9-3.jpg");
        assert_eq!(rows[2].new_filename, "C9-3.jpg");
    }

    #[tokio::test]
    async fn replace_twice_keeps_one_set() {
        let repo = Arc::new(MemoryCaseRepository::new());
        repo.insert_case(1, "C9", Some("doe"), None);
        let case = repo.case(1).unwrap();
        let ledger = AssetLedger::new(repo.clone());

        ledger.replace(&case, &[stored(1), stored(2)]).await.unwrap();
        ledger.replace(&case, &[stored(1), stored(2)]).await.unwrap();

        let rows = repo.assets_for_case("C9").await.unwrap();
        let orders: Vec<_> = rows.iter().map(|r| r.sort_order).collect();
        assert_eq!(orders, vec![1, 2]);
        assert_eq!(repo.case(1).unwrap().image_count, 2);
    }

    #[tokio::test]
    async fn empty_set_clears_rows() {
        let repo = Arc::new(MemoryCaseRepository::new());
        repo.insert_case(1, "C9", Some("doe"), None);
        let case = repo.case(1).unwrap();
        let ledger = AssetLedger::new(repo.clone());

        ledger.replace(&case, &[stored(1)]).await.unwrap();
        ledger.replace(&case, &[]).await.unwrap();

        assert!(repo.assets_for_case("C9").await.unwrap().is_empty());
        assert_eq!(repo.case(1).unwrap().image_count, 0);
    }
}
