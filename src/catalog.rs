//! Read-only Postgres access for the catalog, orders, carts, and shops.
//!
//! The engine never writes. Every query casts ids to `bigint` and prices to
//! `float8` on the way out so the row mapping stays independent of the exact
//! column types the storefront schema uses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio_postgres::{Client, NoTls, Row};

use crate::copurchase::OrderLine;

/// A product joined with its shop, the unit the index is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Product id.
    pub id: i64,
    /// Product name; empty when the row had none.
    pub name: String,
    /// Product description; empty when the row had none.
    pub description: String,
    /// Unit price.
    pub price: f64,
    /// Owning shop id.
    pub shop_id: i64,
    /// Owning shop name.
    pub shop_name: String,
    /// Product image, when one is set.
    pub image_url: Option<String>,
}

impl CatalogItem {
    /// Text the vectorizer sees for this item.
    pub fn content(&self) -> String {
        format!("{} {}", self.name, self.description)
    }
}

/// One product from a user's paid purchase history.
#[derive(Debug, Clone, Copy)]
pub struct PurchasedItem {
    /// Purchased product id.
    pub product_id: i64,
    /// Paid order lines referencing it.
    pub purchase_count: i64,
}

/// A product ranked by total order-line count, for the popularity fallback.
#[derive(Debug, Clone, Serialize)]
pub struct PopularProduct {
    /// Product id.
    pub id: i64,
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
    /// Order lines referencing the product, any payment status.
    pub purchase_count: i64,
}

/// Per-shop activity aggregates for one user's paid orders.
#[derive(Debug, Clone)]
pub struct ShopActivity {
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
}

/// A shop with the aggregates used for the anonymous shop ranking.
#[derive(Debug, Clone, Serialize)]
pub struct ShopOverview {
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
    /// Distinct paid orders touching this shop.
    pub order_count: i64,
    /// Products listed by this shop.
    pub product_count: i64,
}

/// One paid order line for the training-data export.
#[derive(Debug, Clone, Serialize)]
pub struct OrderHistoryRecord {
    /// User who placed the order.
    pub user_id: i64,
    /// Product on the line.
    pub product_id: i64,
    /// Always `paid`; kept as a column so the export is self-describing.
    pub payment_status: String,
    /// Order id.
    pub order_id: i64,
}

/// One shop row for the training-data export.
#[derive(Debug, Clone, Serialize)]
pub struct ShopRecord {
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
}

/// Handle over the read-only catalog queries.
#[derive(Clone)]
pub struct CatalogStore {
    client: Arc<Client>,
}

impl CatalogStore {
    /// Wraps an already-established client.
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Connects to Postgres and spawns the connection task.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("failed to connect to Postgres at {database_url}"))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!("postgres connection error: {err}");
            }
        });
        Ok(Self::new(Arc::new(client)))
    }

    /// Connects with a startup retry loop for databases that come up after
    /// the service does. Returns the last error once attempts are exhausted.
    pub async fn connect_with_retry(
        database_url: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match Self::connect(database_url).await {
                Ok(store) => return Ok(store),
                Err(err) => {
                    tracing::warn!("database not ready (attempt {attempt}/{attempts}): {err:#}");
                    last_err = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("no connection attempts were made"))
            .context("gave up waiting for the database"))
    }

    /// Every product joined with its shop, in id order.
    pub async fn all_products(&self) -> Result<Vec<CatalogItem>> {
        let rows = self
            .client
            .query(ALL_PRODUCTS_SQL, &[])
            .await
            .context("failed to query products")?;
        Ok(rows.iter().map(item_from_row).collect())
    }

    /// Distinct products from the user's paid orders, with line counts.
    pub async fn purchase_history(&self, user_id: i64) -> Result<Vec<PurchasedItem>> {
        let rows = self
            .client
            .query(PURCHASE_HISTORY_SQL, &[&user_id])
            .await
            .with_context(|| format!("failed to query purchase history for user {user_id}"))?;
        Ok(rows
            .iter()
            .map(|row| PurchasedItem {
                product_id: row.get("product_id"),
                purchase_count: row.get("purchase_count"),
            })
            .collect())
    }

    /// Product ids currently in the user's cart.
    pub async fn cart_product_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows = self
            .client
            .query(CART_IDS_SQL, &[&user_id])
            .await
            .with_context(|| format!("failed to query cart items for user {user_id}"))?;
        Ok(rows.iter().map(|row| row.get("product_id")).collect())
    }

    /// All order lines of paid orders containing at least one reference
    /// product. Lines for the reference products themselves are included;
    /// the aggregator filters them.
    pub async fn paid_order_lines_with(&self, reference_ids: &[i64]) -> Result<Vec<OrderLine>> {
        if reference_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = reference_ids.to_vec();
        let rows = self
            .client
            .query(CO_PURCHASE_LINES_SQL, &[&ids])
            .await
            .context("failed to query co-purchase order lines")?;
        Ok(rows
            .iter()
            .map(|row| OrderLine {
                order_id: row.get("order_id"),
                product_id: row.get("product_id"),
            })
            .collect())
    }

    /// Distinct shop ids the user has bought from, paid orders only.
    pub async fn purchased_shop_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        let rows = self
            .client
            .query(PURCHASED_SHOPS_SQL, &[&user_id])
            .await
            .with_context(|| format!("failed to query purchased shops for user {user_id}"))?;
        Ok(rows.iter().map(|row| row.get("shop_id")).collect())
    }

    /// Products ranked by total order-line count, newest first on ties.
    pub async fn popular_products(&self, limit: i64) -> Result<Vec<PopularProduct>> {
        let rows = self
            .client
            .query(POPULAR_PRODUCTS_SQL, &[&limit])
            .await
            .context("failed to query popular products")?;
        Ok(rows
            .iter()
            .map(|row| PopularProduct {
                id: row.get("id"),
                name: text_or_empty(row, "name"),
                price: row.get("price"),
                shop_id: row.get("shop_id"),
                shop_name: text_or_empty(row, "shop_name"),
                image_url: row.get("image_url"),
                purchase_count: row.get("purchase_count"),
            })
            .collect())
    }

    /// Every shop with the user's paid-order aggregates; shops the user
    /// never bought from come back with zeroed aggregates.
    pub async fn shop_activity_for_user(&self, user_id: i64) -> Result<Vec<ShopActivity>> {
        let rows = self
            .client
            .query(SHOP_ACTIVITY_SQL, &[&user_id])
            .await
            .with_context(|| format!("failed to query shop activity for user {user_id}"))?;
        Ok(rows
            .iter()
            .map(|row| ShopActivity {
                id: row.get("id"),
                name: text_or_empty(row, "name"),
                address: row.get("address"),
                contact: row.get("contact"),
                logo: row.get("logo"),
                order_count: row.get("order_count"),
                total_spent: row.get("total_spent"),
                avg_order_value: row.get("avg_order_value"),
            })
            .collect())
    }

    /// Every shop ranked by paid-order count, product count, then name.
    pub async fn shops_by_popularity(&self) -> Result<Vec<ShopOverview>> {
        let rows = self
            .client
            .query(SHOPS_BY_POPULARITY_SQL, &[])
            .await
            .context("failed to query shop popularity")?;
        Ok(rows
            .iter()
            .map(|row| ShopOverview {
                id: row.get("id"),
                name: text_or_empty(row, "name"),
                address: row.get("address"),
                contact: row.get("contact"),
                logo: row.get("logo"),
                order_count: row.get("order_count"),
                product_count: row.get("product_count"),
            })
            .collect())
    }

    /// Paid order lines for the training-data export.
    pub async fn order_history(&self) -> Result<Vec<OrderHistoryRecord>> {
        let rows = self
            .client
            .query(ORDER_HISTORY_SQL, &[])
            .await
            .context("failed to query order history")?;
        Ok(rows
            .iter()
            .map(|row| OrderHistoryRecord {
                user_id: row.get("user_id"),
                product_id: row.get("product_id"),
                payment_status: row.get("payment_status"),
                order_id: row.get("order_id"),
            })
            .collect())
    }

    /// Every shop, for the training-data export.
    pub async fn all_shops(&self) -> Result<Vec<ShopRecord>> {
        let rows = self
            .client
            .query(ALL_SHOPS_SQL, &[])
            .await
            .context("failed to query shops")?;
        Ok(rows
            .iter()
            .map(|row| ShopRecord {
                id: row.get("id"),
                name: text_or_empty(row, "name"),
                address: row.get("address"),
                contact: row.get("contact"),
                logo: row.get("logo"),
            })
            .collect())
    }
}

fn item_from_row(row: &Row) -> CatalogItem {
    CatalogItem {
        id: row.get("id"),
        name: text_or_empty(row, "name"),
        description: text_or_empty(row, "description"),
        price: row.get("price"),
        shop_id: row.get("shop_id"),
        shop_name: text_or_empty(row, "shop_name"),
        image_url: row.get("image_url"),
    }
}

fn text_or_empty(row: &Row, column: &str) -> String {
    row.get::<_, Option<String>>(column).unwrap_or_default()
}

const ALL_PRODUCTS_SQL: &str = "\
    SELECT p.id::bigint AS id, p.name, p.description, p.price::float8 AS price, \
           p.shop_id::bigint AS shop_id, s.name AS shop_name, p.image_url \
    FROM products p \
    JOIN shops s ON p.shop_id = s.id \
    ORDER BY p.id";

const PURCHASE_HISTORY_SQL: &str = "\
    SELECT oi.product_id::bigint AS product_id, COUNT(*) AS purchase_count \
    FROM order_items oi \
    JOIN orders o ON oi.order_id = o.id \
    WHERE o.user_id = $1::bigint AND o.payment_status = 'paid' \
    GROUP BY oi.product_id \
    ORDER BY oi.product_id";

const CART_IDS_SQL: &str = "\
    SELECT product_id::bigint AS product_id \
    FROM cart_items \
    WHERE user_id = $1::bigint";

const CO_PURCHASE_LINES_SQL: &str = "\
    SELECT oi.order_id::bigint AS order_id, oi.product_id::bigint AS product_id \
    FROM order_items oi \
    JOIN orders o ON oi.order_id = o.id \
    WHERE o.payment_status = 'paid' \
      AND EXISTS ( \
          SELECT 1 FROM order_items ref \
          WHERE ref.order_id = oi.order_id \
            AND ref.product_id = ANY($1::bigint[]) \
      )";

const PURCHASED_SHOPS_SQL: &str = "\
    SELECT DISTINCT p.shop_id::bigint AS shop_id \
    FROM order_items oi \
    JOIN orders o ON oi.order_id = o.id \
    JOIN products p ON oi.product_id = p.id \
    WHERE o.user_id = $1::bigint AND o.payment_status = 'paid'";

const POPULAR_PRODUCTS_SQL: &str = "\
    SELECT p.id::bigint AS id, p.name, p.price::float8 AS price, \
           p.shop_id::bigint AS shop_id, s.name AS shop_name, p.image_url, \
           COUNT(oi.id) AS purchase_count \
    FROM products p \
    JOIN shops s ON p.shop_id = s.id \
    LEFT JOIN order_items oi ON p.id = oi.product_id \
    GROUP BY p.id, p.name, p.price, p.shop_id, s.name, p.image_url, p.created_at \
    ORDER BY purchase_count DESC, p.created_at DESC \
    LIMIT $1::bigint";

const SHOP_ACTIVITY_SQL: &str = "\
    SELECT s.id::bigint AS id, s.name, s.address, s.contact, s.logo, \
           COUNT(DISTINCT o.id) AS order_count, \
           COALESCE(SUM(o.total_amount), 0)::float8 AS total_spent, \
           COALESCE(AVG(o.total_amount), 0)::float8 AS avg_order_value \
    FROM shops s \
    LEFT JOIN products p ON s.id = p.shop_id \
    LEFT JOIN order_items oi ON p.id = oi.product_id \
    LEFT JOIN orders o ON oi.order_id = o.id \
        AND o.user_id = $1::bigint AND o.payment_status = 'paid' \
    GROUP BY s.id, s.name, s.address, s.contact, s.logo \
    ORDER BY order_count DESC, total_spent DESC, s.name";

const SHOPS_BY_POPULARITY_SQL: &str = "\
    SELECT s.id::bigint AS id, s.name, s.address, s.contact, s.logo, \
           COUNT(DISTINCT o.id) AS order_count, \
           COUNT(DISTINCT p.id) AS product_count \
    FROM shops s \
    LEFT JOIN products p ON s.id = p.shop_id \
    LEFT JOIN order_items oi ON p.id = oi.product_id \
    LEFT JOIN orders o ON oi.order_id = o.id AND o.payment_status = 'paid' \
    GROUP BY s.id, s.name, s.address, s.contact, s.logo \
    ORDER BY order_count DESC, product_count DESC, s.name";

const ORDER_HISTORY_SQL: &str = "\
    SELECT o.user_id::bigint AS user_id, oi.product_id::bigint AS product_id, \
           o.payment_status, oi.order_id::bigint AS order_id \
    FROM order_items oi \
    JOIN orders o ON oi.order_id = o.id \
    WHERE o.payment_status = 'paid' \
    ORDER BY oi.order_id, oi.product_id";

const ALL_SHOPS_SQL: &str = "\
    SELECT id::bigint AS id, name, address, contact, logo \
    FROM shops \
    ORDER BY id";
