#![warn(missing_docs)]
//! Recommendation and ranking engine for a multi-shop commerce catalog:
//! TF-IDF content similarity, co-purchase aggregation, and the ranking
//! policies behind the storefront's serving surfaces.

pub mod catalog;
pub mod copurchase;
pub mod engine;
pub mod index;
pub mod rankers;
pub mod similarity;
pub mod snapshot;
pub mod stopwords;
pub mod vectorizer;

pub use catalog::{CatalogItem, CatalogStore};
pub use copurchase::{co_purchased, CoPurchase, OrderLine};
pub use engine::{EngineError, HomeFeed, Recommender, ShopRanking};
pub use index::{CatalogIndex, SharedIndex};
pub use snapshot::{Snapshot, SnapshotError};
pub use vectorizer::{TfidfVectorizer, VectorizerError, VectorizerState, DEFAULT_MAX_FEATURES};
