//! The vectorized catalog and its process-wide, build-once holder.
//!
//! `CatalogIndex` is immutable once assembled: item row `i` owns vector row
//! `i` for the index's whole lifetime. `SharedIndex` guards the first build
//! so concurrent callers never race two divergent fits, and republishes
//! wholesale on rebuild so in-flight readers keep a consistent
//! vocabulary/vector pairing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::catalog::CatalogItem;
use crate::snapshot::Snapshot;
use crate::vectorizer::{TfidfVectorizer, VectorizerError, DEFAULT_MAX_FEATURES};

/// Immutable vectorized catalog.
#[derive(Debug)]
pub struct CatalogIndex {
    vectorizer: TfidfVectorizer,
    items: Vec<CatalogItem>,
    vectors: Vec<Vec<f64>>,
    row_by_id: HashMap<i64, usize>,
}

impl CatalogIndex {
    /// Fits a fresh index over `items`. Item order is preserved, so callers
    /// that pass id-ordered rows get a deterministic index.
    pub fn build(items: Vec<CatalogItem>) -> Result<Self, VectorizerError> {
        let corpus: Vec<String> = items.iter().map(CatalogItem::content).collect();
        let mut vectorizer = TfidfVectorizer::new(DEFAULT_MAX_FEATURES);
        let vectors = vectorizer.fit_transform(&corpus)?;
        Ok(Self::assemble(vectorizer, items, vectors))
    }

    /// Restores an index from an already-validated snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, VectorizerError> {
        let vectorizer = TfidfVectorizer::from_state(snapshot.vectorizer)?;
        Ok(Self::assemble(vectorizer, snapshot.items, snapshot.vectors))
    }

    fn assemble(
        vectorizer: TfidfVectorizer,
        items: Vec<CatalogItem>,
        vectors: Vec<Vec<f64>>,
    ) -> Self {
        let row_by_id = items
            .iter()
            .enumerate()
            .map(|(row, item)| (item.id, row))
            .collect();
        Self {
            vectorizer,
            items,
            vectors,
            row_by_id,
        }
    }

    /// Number of indexed items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Row index and attributes for an item id.
    pub fn get(&self, item_id: i64) -> Option<(usize, &CatalogItem)> {
        let row = *self.row_by_id.get(&item_id)?;
        Some((row, &self.items[row]))
    }

    /// Feature vector for a row.
    pub fn vector(&self, row: usize) -> Option<&[f64]> {
        self.vectors.get(row).map(Vec::as_slice)
    }

    /// All items in row order.
    pub fn all_items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// The full vector matrix, row-aligned with `all_items`.
    pub fn all_vectors(&self) -> &[Vec<f64>] {
        &self.vectors
    }

    /// The fitted vectorizer backing this index.
    pub fn vectorizer(&self) -> &TfidfVectorizer {
        &self.vectorizer
    }
}

/// Process-wide index holder.
///
/// The fast path clones the published `Arc` out of a read lock. The build
/// gate serializes build-or-load, so at most one build runs per process and
/// late callers observe the published result instead of starting their own.
#[derive(Default)]
pub struct SharedIndex {
    current: RwLock<Option<Arc<CatalogIndex>>>,
    build_gate: Mutex<()>,
}

impl SharedIndex {
    /// Creates an empty holder.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published index, when one exists.
    pub async fn get(&self) -> Option<Arc<CatalogIndex>> {
        self.current.read().await.clone()
    }

    /// Returns the published index, or runs `build` to produce it.
    ///
    /// Concurrent first callers wait on the same build. A failed build
    /// publishes nothing, so the next caller retries.
    pub async fn get_or_build<F, Fut, E>(&self, build: F) -> Result<Arc<CatalogIndex>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CatalogIndex, E>>,
    {
        if let Some(index) = self.get().await {
            return Ok(index);
        }
        let _gate = self.build_gate.lock().await;
        // Someone else may have finished the build while we waited.
        if let Some(index) = self.get().await {
            return Ok(index);
        }
        let index = Arc::new(build().await?);
        *self.current.write().await = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Builds fresh and replaces the published index atomically. In-flight
    /// readers keep whatever `Arc` they already cloned.
    pub async fn rebuild<F, Fut, E>(&self, build: F) -> Result<Arc<CatalogIndex>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CatalogIndex, E>>,
    {
        let _gate = self.build_gate.lock().await;
        let index = Arc::new(build().await?);
        *self.current.write().await = Some(Arc::clone(&index));
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn sample_items() -> Vec<CatalogItem> {
        vec![
            CatalogItem {
                id: 11,
                name: "Synthetic Engine Oil".to_string(),
                description: "High performance oil for gasoline engines".to_string(),
                price: 35.0,
                shop_id: 1,
                shop_name: "AutoParts Zone".to_string(),
                image_url: None,
            },
            CatalogItem {
                id: 12,
                name: "Oil Filter".to_string(),
                description: "Removes contaminants".to_string(),
                price: 4.5,
                shop_id: 1,
                shop_name: "AutoParts Zone".to_string(),
                image_url: None,
            },
            CatalogItem {
                id: 13,
                name: "Basic Car Wash".to_string(),
                description: "Exterior foam wash".to_string(),
                price: 5.0,
                shop_id: 3,
                shop_name: "Sparkle Car Wash".to_string(),
                image_url: None,
            },
        ]
    }

    #[test]
    fn build_pairs_rows_with_items() {
        let index = CatalogIndex::build(sample_items()).unwrap();
        assert_eq!(index.len(), 3);
        let (row, item) = index.get(12).unwrap();
        assert_eq!(item.name, "Oil Filter");
        let vector = index.vector(row).unwrap();
        assert_eq!(vector.len(), index.vectorizer().dimension());
        assert!(vector.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn unknown_id_is_a_miss() {
        let index = CatalogIndex::build(sample_items()).unwrap();
        assert!(index.get(999).is_none());
    }

    #[test]
    fn snapshot_restore_matches_fresh_build() {
        let built = CatalogIndex::build(sample_items()).unwrap();
        let snapshot = Snapshot {
            vectorizer: built.vectorizer().state(),
            items: built.all_items().to_vec(),
            vectors: built.all_vectors().to_vec(),
        };
        let restored = CatalogIndex::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.all_vectors(), built.all_vectors());
        assert_eq!(restored.all_items(), built.all_items());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_first_calls_share_one_build() {
        let shared = Arc::new(SharedIndex::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let build = |counter: Arc<AtomicUsize>| {
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                CatalogIndex::build(sample_items())
            }
        };
        let (a, b) = tokio::join!(
            shared.get_or_build(build(Arc::clone(&builds))),
            shared.get_or_build(build(Arc::clone(&builds))),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failed_build_leaves_holder_empty_for_retry() {
        let shared = SharedIndex::new();
        let failed: Result<Arc<CatalogIndex>, VectorizerError> = shared
            .get_or_build(|| async { Err(VectorizerError::EmptyVocabulary) })
            .await;
        assert!(failed.is_err());
        assert!(shared.get().await.is_none());

        let recovered = shared
            .get_or_build(|| async { CatalogIndex::build(sample_items()) })
            .await
            .unwrap();
        assert_eq!(recovered.len(), 3);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rebuild_replaces_published_index() {
        let shared = SharedIndex::new();
        let first = shared
            .get_or_build(|| async { CatalogIndex::build(sample_items()) })
            .await
            .unwrap();

        let mut fewer = sample_items();
        fewer.truncate(2);
        let second = shared
            .rebuild(|| async { CatalogIndex::build(fewer) })
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.len(), 2);
        let current = shared.get().await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        // The old value stays readable for in-flight users.
        assert_eq!(first.len(), 3);
    }
}
