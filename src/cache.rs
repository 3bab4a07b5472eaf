//! Read-through cache of case HTML, scoped to one scheduler run.
//!
//! The claimed batch's HTML is loaded with one query up front
//! ([`HtmlCache::preload`]); anything missed is fetched on demand. The cache
//! is dropped with the run, so no HTML outlives it.

use crate::error::Result;
use crate::model::CaseRowId;
use crate::store::CaseRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct HtmlCache {
    repo: Arc<dyn CaseRepository>,
    entries: Mutex<HashMap<CaseRowId, Option<Arc<str>>>>,
}

impl HtmlCache {
    pub fn new(repo: Arc<dyn CaseRepository>) -> Self {
        Self {
            repo,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Load HTML for every id in one round trip. Ids without HTML are
    /// remembered as absent.
    pub async fn preload(&self, ids: &[CaseRowId]) -> Result<()> {
        let mut loaded = self.repo.load_html(ids).await?;
        let mut entries = self.entries.lock().await;
        for id in ids {
            let html = loaded.remove(id).map(Arc::<str>::from);
            entries.insert(*id, html);
        }
        debug!(cases = ids.len(), "Preloaded case HTML");
        Ok(())
    }

    /// HTML for `id`, loading it on a miss. `None` when the row has none.
    pub async fn get(&self, id: CaseRowId) -> Result<Option<Arc<str>>> {
        if let Some(hit) = self.entries.lock().await.get(&id) {
            return Ok(hit.clone());
        }
        let html = self
            .repo
            .load_html(&[id])
            .await?
            .remove(&id)
            .map(Arc::<str>::from);
        self.entries.lock().await.insert(id, html.clone());
        Ok(html)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryCaseRepository;

    #[tokio::test]
    async fn preload_then_hit() {
        let repo = Arc::new(MemoryCaseRepository::new());
        repo.insert_case(1, "A", Some("a"), Some("<img src=/a.jpg>"));
        repo.insert_case(2, "B", Some("b"), None);

        let cache = HtmlCache::new(repo.clone());
        cache.preload(&[1, 2]).await.unwrap();
        assert_eq!(cache.len().await, 2);

        assert_eq!(cache.get(1).await.unwrap().as_deref(), Some("<img src=/a.jpg>"));
        assert_eq!(cache.get(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn miss_reads_through() {
        let repo = Arc::new(MemoryCaseRepository::new());
        repo.insert_case(7, "G", Some("g"), Some("<p>late</p>"));

        let cache = HtmlCache::new(repo);
        assert_eq!(cache.len().await, 0);
        assert_eq!(cache.get(7).await.unwrap().as_deref(), Some("<p>late</p>"));
        assert_eq!(cache.len().await, 1);
    }
}
