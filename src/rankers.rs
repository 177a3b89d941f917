//! The ranking policies, as pure functions over the catalog index and
//! pre-fetched user signals.
//!
//! Nothing here touches the database; the engine gathers the signals and
//! hands them in. Every ordering is deterministic: scores sort descending
//! and ties keep the input row order.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::Serialize;

use crate::catalog::ShopActivity;
use crate::copurchase::CoPurchase;
use crate::index::CatalogIndex;
use crate::similarity;
use crate::vectorizer::VectorizerError;

/// Score boost for items whose name contains the query text.
const NAME_MATCH_BOOST: f64 = 0.3;
/// Score boost for items from shops the user has bought from before.
const PREFERRED_SHOP_BOOST: f64 = 0.1;

/// Content-ranked product row, served on the home and similar-items
/// surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedProduct {
    /// Product id.
    pub id: i64,
    /// Product name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Owning shop name.
    pub shop_name: String,
    /// Product image, when one is set.
    pub image_url: Option<String>,
    /// Cosine similarity against the query profile.
    pub similarity_score: f64,
}

/// Search result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Product id.
    pub id: i64,
    /// Product name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Owning shop name.
    pub shop_name: String,
    /// Product image, when one is set.
    pub image_url: Option<String>,
    /// Vector relevance plus the name and shop boosts.
    pub relevance_score: f64,
}

/// "Customers also bought" row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlsoBought {
    /// Product id.
    pub product_id: i64,
    /// Paid order lines sharing an order with the reference product.
    pub co_purchase_count: i64,
    /// Product name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Owning shop id.
    pub shop_id: i64,
    /// Owning shop name.
    pub shop_name: String,
    /// Product image, when one is set.
    pub image_url: Option<String>,
}

/// Cart complement row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartComplement {
    /// Product id.
    pub product_id: i64,
    /// Paid order lines sharing an order with any cart item.
    pub frequency: i64,
    /// Product name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Owning shop id.
    pub shop_id: i64,
    /// Owning shop name.
    pub shop_name: String,
    /// Product image, when one is set.
    pub image_url: Option<String>,
}

/// A cheaper same-name alternative for one cart item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    /// The cart item the deal applies to.
    pub cart_product_id: i64,
    /// The cart item's name; the alternative matched it after trimming
    /// and case-folding.
    pub name: String,
    /// Price the cart item sells for.
    pub cart_price: f64,
    /// The cheaper alternative.
    pub alt_product_id: i64,
    /// The alternative's price, strictly below `cart_price`.
    pub alt_price: f64,
    /// Shop selling the alternative.
    pub shop_id: i64,
    /// Name of the shop selling the alternative.
    pub shop_name: String,
    /// The alternative's image, when one is set.
    pub image_url: Option<String>,
    /// `cart_price - alt_price`.
    pub savings: f64,
}

/// Shop row carrying the blended preference score for a known user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedShop {
    /// Shop id.
    pub id: i64,
    /// Shop name.
    pub name: String,
    /// Street address, when set.
    pub address: Option<String>,
    /// Contact line, when set.
    pub contact: Option<String>,
    /// Logo URL, when set.
    pub logo: Option<String>,
    /// Distinct paid orders the user placed touching this shop.
    pub order_count: i64,
    /// Total paid order value attributed to this shop.
    pub total_spent: f64,
    /// Mean paid order value attributed to this shop.
    pub avg_order_value: f64,
    /// Blend of normalized order count and spend, in `[0, 1]`.
    pub preference_score: f64,
}

/// Mean vector of the purchased items that are present in the index.
/// `None` when none of them are, which sends the caller to the popularity
/// fallback.
pub fn affinity_profile(index: &CatalogIndex, purchased_ids: &[i64]) -> Option<Vec<f64>> {
    let rows: Vec<&[f64]> = purchased_ids
        .iter()
        .filter_map(|id| index.get(*id))
        .filter_map(|(row, _)| index.vector(row))
        .collect();
    if rows.is_empty() {
        None
    } else {
        Some(similarity::mean_vector(&rows))
    }
}

/// Scores every indexed item against `profile`, skips excluded ids, and
/// returns the top rows.
pub fn rank_by_affinity(
    index: &CatalogIndex,
    profile: &[f64],
    exclude: &HashSet<i64>,
    limit: usize,
) -> Vec<RankedProduct> {
    let scores = similarity::scores_against_all(profile, index.all_vectors());
    let mut ranked: Vec<RankedProduct> = index
        .all_items()
        .iter()
        .zip(scores)
        .filter(|(item, _)| !exclude.contains(&item.id))
        .map(|(item, score)| RankedProduct {
            id: item.id,
            name: item.name.clone(),
            price: item.price,
            shop_name: item.shop_name.clone(),
            image_url: item.image_url.clone(),
            similarity_score: score,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

/// Items most similar to one target item, the target itself excluded.
/// Unknown target → empty.
pub fn similar_items(index: &CatalogIndex, product_id: i64, limit: usize) -> Vec<RankedProduct> {
    let query = match index.get(product_id).and_then(|(row, _)| index.vector(row)) {
        Some(vector) => vector,
        None => return Vec::new(),
    };
    let exclude = HashSet::from([product_id]);
    rank_by_affinity(index, query, &exclude, limit)
}

/// Resolves co-purchase counts into "also bought" rows. Counted ids missing
/// from the index are skipped.
pub fn also_bought_rows(
    index: &CatalogIndex,
    counts: &[CoPurchase],
    limit: usize,
) -> Vec<AlsoBought> {
    counts
        .iter()
        .filter_map(|count| {
            let (_, item) = index.get(count.product_id)?;
            Some(AlsoBought {
                product_id: item.id,
                co_purchase_count: count.frequency,
                name: item.name.clone(),
                price: item.price,
                shop_id: item.shop_id,
                shop_name: item.shop_name.clone(),
                image_url: item.image_url.clone(),
            })
        })
        .take(limit)
        .collect()
}

/// Same resolution for the cart surface, which reports the count as
/// `frequency`.
pub fn complement_rows(
    index: &CatalogIndex,
    counts: &[CoPurchase],
    limit: usize,
) -> Vec<CartComplement> {
    counts
        .iter()
        .filter_map(|count| {
            let (_, item) = index.get(count.product_id)?;
            Some(CartComplement {
                product_id: item.id,
                frequency: count.frequency,
                name: item.name.clone(),
                price: item.price,
                shop_id: item.shop_id,
                shop_name: item.shop_name.clone(),
                image_url: item.image_url.clone(),
            })
        })
        .take(limit)
        .collect()
}

/// Cheaper alternatives for every cart item present in the index. Names
/// must match exactly after trimming and case-folding, the alternative's
/// price must be strictly lower, and items already in the cart are never
/// offered. Sorted by savings descending across the whole cart.
pub fn best_deals(index: &CatalogIndex, cart_ids: &[i64], limit: usize) -> Vec<Deal> {
    let in_cart: HashSet<i64> = cart_ids.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut deals = Vec::new();
    for cart_id in cart_ids {
        if !seen.insert(*cart_id) {
            continue;
        }
        let cart_item = match index.get(*cart_id) {
            Some((_, item)) => item,
            None => continue,
        };
        let wanted = normalized_name(&cart_item.name);
        for alt in index.all_items() {
            if in_cart.contains(&alt.id) || alt.price >= cart_item.price {
                continue;
            }
            if normalized_name(&alt.name) != wanted {
                continue;
            }
            deals.push(Deal {
                cart_product_id: cart_item.id,
                name: cart_item.name.clone(),
                cart_price: cart_item.price,
                alt_product_id: alt.id,
                alt_price: alt.price,
                shop_id: alt.shop_id,
                shop_name: alt.shop_name.clone(),
                image_url: alt.image_url.clone(),
                savings: cart_item.price - alt.price,
            });
        }
    }
    deals.sort_by(|a, b| b.savings.partial_cmp(&a.savings).unwrap_or(Ordering::Equal));
    deals.truncate(limit);
    deals
}

fn normalized_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Blends order count and spend into a preference score per shop. A zero
/// maximum counts as one, so shops with no activity score zero instead of
/// dividing by zero. Ties keep the input order.
pub fn rank_shops(shops: Vec<ShopActivity>) -> Vec<RankedShop> {
    let max_orders = shops
        .iter()
        .map(|shop| shop.order_count)
        .max()
        .filter(|max| *max > 0)
        .unwrap_or(1) as f64;
    let max_spent = shops
        .iter()
        .map(|shop| shop.total_spent)
        .fold(0.0_f64, f64::max);
    let max_spent = if max_spent > 0.0 { max_spent } else { 1.0 };

    let mut ranked: Vec<RankedShop> = shops
        .into_iter()
        .map(|shop| {
            let preference_score = 0.5 * shop.order_count as f64 / max_orders
                + 0.5 * shop.total_spent / max_spent;
            RankedShop {
                id: shop.id,
                name: shop.name,
                address: shop.address,
                contact: shop.contact,
                logo: shop.logo,
                order_count: shop.order_count,
                total_spent: shop.total_spent,
                avg_order_value: shop.avg_order_value,
                preference_score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.preference_score
            .partial_cmp(&a.preference_score)
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

/// Scores every indexed item against a free-text query: vector relevance,
/// plus a boost when the name contains the query, plus a smaller boost for
/// shops in `preferred_shops`. Hits scoring zero or below are dropped.
/// A blank query returns no hits.
pub fn search(
    index: &CatalogIndex,
    query: &str,
    preferred_shops: &HashSet<i64>,
    limit: usize,
) -> Result<Vec<SearchHit>, VectorizerError> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let query_vector = index.vectorizer().transform(query)?;
    let scores = similarity::scores_against_all(&query_vector, index.all_vectors());
    let mut hits: Vec<SearchHit> = index
        .all_items()
        .iter()
        .zip(scores)
        .map(|(item, base)| {
            let mut score = base;
            if item.name.to_lowercase().contains(&needle) {
                score += NAME_MATCH_BOOST;
            }
            if preferred_shops.contains(&item.shop_id) {
                score += PREFERRED_SHOP_BOOST;
            }
            SearchHit {
                id: item.id,
                name: item.name.clone(),
                price: item.price,
                shop_name: item.shop_name.clone(),
                image_url: item.image_url.clone(),
                relevance_score: score,
            }
        })
        .filter(|hit| hit.relevance_score > 0.0)
        .collect();
    hits.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    hits.truncate(limit);
    Ok(hits)
}
