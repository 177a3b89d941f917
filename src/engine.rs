//! Request-time orchestration: ensure the index, fetch user signals, run
//! the ranking policies.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use crate::catalog::{CatalogStore, PopularProduct, ShopOverview};
use crate::copurchase;
use crate::index::{CatalogIndex, SharedIndex};
use crate::rankers::{
    self, AlsoBought, CartComplement, Deal, RankedProduct, RankedShop, SearchHit,
};
use crate::snapshot::{self, SnapshotError};

/// What a ranking call can fail with. The transport layer decides the
/// user-visible representation per variant.
#[derive(Debug)]
pub enum EngineError {
    /// The caller's request was malformed. Distinct from "no results".
    InvalidInput(&'static str),
    /// The store or the index build failed.
    Store(anyhow::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidInput(reason) => write!(f, "invalid request: {reason}"),
            EngineError::Store(err) => write!(f, "store failure: {err:#}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Store(err)
    }
}

/// Home feed payload. Affinity scores for users with usable history, the
/// popularity fallback for everyone else.
#[derive(Debug)]
pub enum HomeFeed {
    /// Affinity-ranked rows for the requesting user.
    Personalized(Vec<RankedProduct>),
    /// Popularity fallback rows.
    Popular(Vec<PopularProduct>),
}

/// Shop listing payload. Blended preference order for a known user,
/// popularity order otherwise.
#[derive(Debug)]
pub enum ShopRanking {
    /// Shops in blended preference order for the requesting user.
    Personalized(Vec<RankedShop>),
    /// Shops in overall popularity order.
    Popular(Vec<ShopOverview>),
}

/// The recommendation engine: one store handle, one shared index.
pub struct Recommender {
    store: CatalogStore,
    index: SharedIndex,
    snapshot_dir: Option<PathBuf>,
}

impl Recommender {
    /// Creates an engine over `store`. When `snapshot_dir` is set, the first
    /// index build tries the persisted artifacts there before fitting from
    /// the database.
    pub fn new(store: CatalogStore, snapshot_dir: Option<PathBuf>) -> Self {
        Self {
            store,
            index: SharedIndex::new(),
            snapshot_dir,
        }
    }

    /// The shared index, built on first use.
    pub async fn index(&self) -> Result<Arc<CatalogIndex>, EngineError> {
        self.index
            .get_or_build(|| async { self.load_index().await })
            .await
    }

    async fn load_index(&self) -> Result<CatalogIndex, EngineError> {
        if let Some(dir) = self.snapshot_dir.as_ref() {
            match snapshot::load(dir).map(CatalogIndex::from_snapshot) {
                Ok(Ok(index)) => {
                    tracing::info!("loaded catalog index from snapshot ({} items)", index.len());
                    return Ok(index);
                }
                Ok(Err(err)) => {
                    tracing::warn!("snapshot rejected: {err}; fitting from the database");
                }
                Err(SnapshotError::Missing(path)) => {
                    tracing::info!(
                        "no snapshot at {}; fitting from the database",
                        path.display()
                    );
                }
                Err(err) => {
                    tracing::warn!("snapshot unusable: {err}; fitting from the database");
                }
            }
        }
        let items = self.store.all_products().await?;
        let index = CatalogIndex::build(items)
            .context("failed to fit the catalog vectorizer")
            .map_err(EngineError::Store)?;
        tracing::info!("built catalog index from the database ({} items)", index.len());
        Ok(index)
    }

    /// Home feed for a user. Falls back to popularity when there is no user,
    /// no purchase history, or none of the purchased items are indexed.
    pub async fn home_feed(
        &self,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<HomeFeed, EngineError> {
        let user_id = match user_id {
            Some(id) => id,
            None => return self.popular_feed(limit).await,
        };
        let index = self.index().await?;
        let history = self.store.purchase_history(user_id).await?;
        let purchased: Vec<i64> = history.iter().map(|p| p.product_id).collect();
        let profile = match rankers::affinity_profile(&index, &purchased) {
            Some(profile) => profile,
            None => return self.popular_feed(limit).await,
        };
        let cart = self.store.cart_product_ids(user_id).await?;
        let mut exclude: HashSet<i64> = purchased.into_iter().collect();
        exclude.extend(cart);
        let ranked = rankers::rank_by_affinity(&index, &profile, &exclude, limit);
        Ok(HomeFeed::Personalized(ranked))
    }

    async fn popular_feed(&self, limit: usize) -> Result<HomeFeed, EngineError> {
        let popular = self.store.popular_products(limit as i64).await?;
        Ok(HomeFeed::Popular(popular))
    }

    /// Items most similar to one product. The id is required.
    pub async fn similar_items(
        &self,
        product_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RankedProduct>, EngineError> {
        let product_id =
            product_id.ok_or(EngineError::InvalidInput("product_id is required"))?;
        let index = self.index().await?;
        Ok(rankers::similar_items(&index, product_id, limit))
    }

    /// "Customers also bought" for one product. The id is required.
    pub async fn also_bought(
        &self,
        product_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<AlsoBought>, EngineError> {
        let product_id =
            product_id.ok_or(EngineError::InvalidInput("product_id is required"))?;
        let index = self.index().await?;
        let reference_ids = HashSet::from([product_id]);
        let lines = self.store.paid_order_lines_with(&[product_id]).await?;
        let counts = copurchase::co_purchased(&lines, &reference_ids, limit);
        Ok(rankers::also_bought_rows(&index, &counts, limit))
    }

    /// Items frequently bought together with the cart. An empty cart is a
    /// benign empty result.
    pub async fn cart_complements(
        &self,
        product_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<CartComplement>, EngineError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.index().await?;
        let reference_ids: HashSet<i64> = product_ids.iter().copied().collect();
        let lines = self.store.paid_order_lines_with(product_ids).await?;
        let counts = copurchase::co_purchased(&lines, &reference_ids, limit);
        Ok(rankers::complement_rows(&index, &counts, limit))
    }

    /// Cheaper same-name alternatives for the cart. An empty cart is a
    /// benign empty result.
    pub async fn cart_best_deals(
        &self,
        product_ids: &[i64],
        limit: usize,
    ) -> Result<Vec<Deal>, EngineError> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        let index = self.index().await?;
        Ok(rankers::best_deals(&index, product_ids, limit))
    }

    /// Shop listing order, personalized when a user id is given.
    pub async fn shop_ranking(&self, user_id: Option<i64>) -> Result<ShopRanking, EngineError> {
        match user_id {
            Some(user_id) => {
                let shops = self.store.shop_activity_for_user(user_id).await?;
                Ok(ShopRanking::Personalized(rankers::rank_shops(shops)))
            }
            None => {
                let shops = self.store.shops_by_popularity().await?;
                Ok(ShopRanking::Popular(shops))
            }
        }
    }

    /// Free-text product search. A blank query is a benign empty result and
    /// never touches the index.
    pub async fn search(
        &self,
        query: &str,
        user_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SearchHit>, EngineError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let index = self.index().await?;
        let preferred: HashSet<i64> = match user_id {
            Some(user_id) => {
                let shops = self.store.purchased_shop_ids(user_id).await?;
                shops.into_iter().collect()
            }
            None => HashSet::new(),
        };
        rankers::search(&index, query, &preferred, limit)
            .context("failed to vectorize the search query")
            .map_err(EngineError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_reads_like_a_caller_error() {
        let err = EngineError::InvalidInput("product_id is required");
        assert_eq!(err.to_string(), "invalid request: product_id is required");
    }

    #[test]
    fn store_errors_keep_their_context() {
        let source = anyhow::anyhow!("connection refused").context("failed to query products");
        let err = EngineError::from(source);
        let text = err.to_string();
        assert!(text.contains("failed to query products"));
        assert!(text.contains("connection refused"));
    }
}
