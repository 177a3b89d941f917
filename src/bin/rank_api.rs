use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use shoprank::catalog::CatalogStore;
use shoprank::engine::{EngineError, HomeFeed, Recommender, ShopRanking};
use shoprank::rankers::{AlsoBought, CartComplement, Deal, RankedProduct, SearchHit};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "shoprank-api",
    about = "HTTP API serving the recommendation and ranking surfaces of the storefront"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "SHOPRANK_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory holding trained snapshot artifacts. When nothing usable is
    /// there, the index is fitted from the database on first use.
    #[arg(long, env = "SHOPRANK_MODELS_DIR", default_value = "data/models")]
    models_dir: PathBuf,

    /// Connection attempts before giving up on the database.
    #[arg(long, env = "SHOPRANK_DB_ATTEMPTS", default_value_t = 30)]
    db_attempts: u32,

    /// Seconds between connection attempts.
    #[arg(long, env = "SHOPRANK_DB_RETRY_SECS", default_value_t = 2)]
    db_retry_secs: u64,

    /// Build the catalog index before accepting traffic.
    #[arg(long)]
    warm_index: bool,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<Recommender>,
}

fn default_home_limit() -> usize {
    8
}

fn default_product_limit() -> usize {
    5
}

fn default_cart_limit() -> usize {
    5
}

fn default_deals_limit() -> usize {
    3
}

fn default_search_limit() -> usize {
    20
}

#[derive(Debug, Deserialize)]
struct HomeRequest {
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default = "default_home_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ProductRequest {
    #[serde(default)]
    product_id: Option<i64>,
    #[serde(default = "default_product_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct CartRequest {
    #[serde(default)]
    product_ids: Vec<i64>,
    #[serde(default = "default_cart_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct DealsRequest {
    #[serde(default)]
    product_ids: Vec<i64>,
    #[serde(default = "default_deals_limit")]
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ShopsRequest {
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ApiCli::parse();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let store = CatalogStore::connect_with_retry(
        &cli.database_url,
        cli.db_attempts,
        Duration::from_secs(cli.db_retry_secs),
    )
    .await?;
    let engine = Arc::new(Recommender::new(store, Some(cli.models_dir)));

    if cli.warm_index {
        let index = engine
            .index()
            .await
            .context("failed to warm the catalog index")?;
        tracing::info!("catalog index warmed ({} items)", index.len());
    }

    let state = AppState { engine };
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/recommend/home", post(home_handler))
        .route("/api/product/similar", post(similar_handler))
        .route("/api/product/also-bought", post(also_bought_handler))
        .route("/api/cart/complementary", post(complementary_handler))
        .route("/api/cart/best-deals", post(deals_handler))
        .route("/api/shops/ranked", post(shops_handler))
        .route("/api/search", post(search_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!("shoprank-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        service: "shoprank-api",
    })
}

async fn home_handler(
    State(state): State<AppState>,
    Json(request): Json<HomeRequest>,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let feed = state
        .engine
        .home_feed(request.user_id, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(match feed {
        HomeFeed::Personalized(rows) => Json(rows).into_response(),
        HomeFeed::Popular(rows) => Json(rows).into_response(),
    })
}

async fn similar_handler(
    State(state): State<AppState>,
    Json(request): Json<ProductRequest>,
) -> Result<Json<Vec<RankedProduct>>, (StatusCode, Json<ErrorBody>)> {
    let rows = state
        .engine
        .similar_items(request.product_id, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(rows))
}

async fn also_bought_handler(
    State(state): State<AppState>,
    Json(request): Json<ProductRequest>,
) -> Result<Json<Vec<AlsoBought>>, (StatusCode, Json<ErrorBody>)> {
    let rows = state
        .engine
        .also_bought(request.product_id, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(rows))
}

async fn complementary_handler(
    State(state): State<AppState>,
    Json(request): Json<CartRequest>,
) -> Result<Json<Vec<CartComplement>>, (StatusCode, Json<ErrorBody>)> {
    let rows = state
        .engine
        .cart_complements(&request.product_ids, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(rows))
}

async fn deals_handler(
    State(state): State<AppState>,
    Json(request): Json<DealsRequest>,
) -> Result<Json<Vec<Deal>>, (StatusCode, Json<ErrorBody>)> {
    let rows = state
        .engine
        .cart_best_deals(&request.product_ids, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(rows))
}

async fn shops_handler(
    State(state): State<AppState>,
    Json(request): Json<ShopsRequest>,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let ranking = state
        .engine
        .shop_ranking(request.user_id)
        .await
        .map_err(engine_error)?;
    Ok(match ranking {
        ShopRanking::Personalized(rows) => Json(rows).into_response(),
        ShopRanking::Popular(rows) => Json(rows).into_response(),
    })
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, (StatusCode, Json<ErrorBody>)> {
    let rows = state
        .engine
        .search(&request.query, request.user_id, request.limit)
        .await
        .map_err(engine_error)?;
    Ok(Json(rows))
}

fn engine_error(err: EngineError) -> (StatusCode, Json<ErrorBody>) {
    match err {
        EngineError::InvalidInput(reason) => bad_request(reason),
        EngineError::Store(err) => internal_error(err),
    }
}

fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!("ranking call failed: {err:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}
