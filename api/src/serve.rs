use std::sync::Arc;

use alloy::primitives::Address;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Datelike, Utc};
use inflow_common::{
    cache_key, period::parse_year, BlockInfo, Period, Transaction, VolumeCache, VolumeStats,
};
use inflow_pipeline::{
    gap_fill::{year_view, VolumeView},
    provider::TransferProvider,
    store::VolumeStore,
    VolumePipeline,
};
use inflow_utils::price_manager::PriceFeed;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::CancellationToken;

const DEFAULT_TRANSACTIONS_LIMIT: usize = 50;
const MAX_TRANSACTIONS_LIMIT: usize = 1000;

/// Shared by every request. Refreshes go through `refresh_lock` one at a time.
pub struct AppState<P, F, S> {
    pipeline: Arc<VolumePipeline<P, F, S>>,
    wallet: Address,
    refresh_lock: Arc<Mutex<()>>,
}

impl<P, F, S> Clone for AppState<P, F, S> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            wallet: self.wallet,
            refresh_lock: self.refresh_lock.clone(),
        }
    }
}

impl<P, F, S> AppState<P, F, S> {
    pub fn new(pipeline: VolumePipeline<P, F, S>, wallet: Address) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            wallet,
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }
}

pub fn router<P, F, S>(state: AppState<P, F, S>) -> Router
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    Router::new()
        .route("/api/health", get(health))
        .route("/api/volume", get(volume::<P, F, S>))
        .route("/api/status", get(status::<P, F, S>))
        .route("/api/transactions", get(transactions::<P, F, S>))
        .route("/api/refresh", post(refresh::<P, F, S>))
        .fallback(not_found)
        .with_state(state)
}

/// Start the HTTP server and block until `shutdown` is cancelled.
/// Returns an error if the port cannot be bound or the server crashes.
pub async fn serve<P, F, S>(
    state: AppState<P, F, S>,
    port: u16,
    shutdown: CancellationToken,
) -> crate::Result<()>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let listener = TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .map_err(|e| crate::Error::PortBindingFailed(port, e))?;
    tracing::info!(port, wallet = %state.wallet, "serving volume API");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(crate::Error::ServerCrashed)?;

    tracing::info!("server stopped");
    Ok(())
}

fn year_or_current(year: Option<&str>) -> crate::Result<i32> {
    match year {
        Some(year) => Ok(parse_year(year)?),
        None => Ok(Utc::now().year()),
    }
}

/// Reads the cached volume of the served wallet on the blocking pool, the
/// file store does synchronous IO.
async fn load_cache<P, F, S>(state: &AppState<P, F, S>, year: i32) -> crate::Result<Option<VolumeCache>>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let pipeline = state.pipeline.clone();
    let key = cache_key(&state.wallet, year);
    let cache = tokio::task::spawn_blocking(move || pipeline.store().get(&key)).await??;
    Ok(cache)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found() -> crate::Error {
    crate::Error::NotFound("No such endpoint.".to_string())
}

#[derive(Debug, Default, Deserialize)]
pub struct VolumeParams {
    pub period: Option<String>,
    pub year: Option<String>,
}

pub async fn volume<P, F, S>(
    State(state): State<AppState<P, F, S>>,
    Query(params): Query<VolumeParams>,
) -> crate::Result<Json<VolumeView>>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let period = match params.period.as_deref() {
        Some(period) => Period::parse(period)?,
        None => Period::Daily,
    };
    let year = year_or_current(params.year.as_deref())?;
    let cache = load_cache(&state, year).await?;

    Ok(Json(year_view(cache.as_ref(), period, year)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct YearParams {
    pub year: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub wallet: Address,
    pub year: i32,
    pub last_updated: Option<DateTime<Utc>>,
    pub block_info: BlockInfo,
    pub stats: VolumeStats,
    pub transaction_count: usize,
}

pub async fn status<P, F, S>(
    State(state): State<AppState<P, F, S>>,
    Query(params): Query<YearParams>,
) -> crate::Result<Json<StatusResponse>>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let year = year_or_current(params.year.as_deref())?;
    let cache = load_cache(&state, year)
        .await?
        .ok_or_else(|| crate::Error::NotFound(format!("No volume data for {year} yet.")))?;

    Ok(Json(StatusResponse {
        wallet: state.wallet,
        year,
        last_updated: cache.last_updated,
        block_info: cache.block_info,
        stats: cache.stats,
        transaction_count: cache.transactions.len(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionsParams {
    pub year: Option<String>,
    pub limit: Option<String>,
}

/// Most recent transactions first.
pub async fn transactions<P, F, S>(
    State(state): State<AppState<P, F, S>>,
    Query(params): Query<TransactionsParams>,
) -> crate::Result<Json<Vec<Transaction>>>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let year = year_or_current(params.year.as_deref())?;
    let limit = match params.limit.as_deref() {
        Some(limit) => limit
            .trim()
            .parse::<usize>()
            .map_err(|_| crate::Error::BadRequest(format!("Invalid limit '{limit}'.")))?,
        None => DEFAULT_TRANSACTIONS_LIMIT,
    }
    .min(MAX_TRANSACTIONS_LIMIT);

    let mut transactions = load_cache(&state, year)
        .await?
        .map(|cache| cache.transactions)
        .unwrap_or_default();
    transactions.sort_by(|a, b| b.block_number.cmp(&a.block_number));
    transactions.truncate(limit);

    Ok(Json(transactions))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshParams {
    pub year: Option<String>,
    pub force: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub key: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub new_transactions: usize,
    pub failed_ranges: usize,
    pub truncated_ranges: usize,
    pub last_processed_block: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub stats: VolumeStats,
    pub cache_error: Option<String>,
}

fn parse_flag(value: Option<&str>) -> crate::Result<bool> {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(crate::Error::BadRequest(format!(
            "Invalid boolean '{other}'."
        ))),
    }
}

pub async fn refresh<P, F, S>(
    State(state): State<AppState<P, F, S>>,
    Query(params): Query<RefreshParams>,
) -> crate::Result<Json<RefreshResponse>>
where
    P: TransferProvider + 'static,
    F: PriceFeed + 'static,
    S: VolumeStore + 'static,
{
    let year = year_or_current(params.year.as_deref())?;
    let force = parse_flag(params.force.as_deref())?;

    let _guard = state.refresh_lock.lock().await;
    let outcome = state
        .pipeline
        .refresh_volume(
            &format!("{:#x}", state.wallet),
            &year.to_string(),
            None,
            force,
        )
        .await?;

    Ok(Json(RefreshResponse {
        key: outcome.key,
        from_block: outcome.range.map(|(from, _)| from),
        to_block: outcome.range.map(|(_, to)| to),
        new_transactions: outcome.new_transactions,
        failed_ranges: outcome.failed_ranges,
        truncated_ranges: outcome.truncated_ranges,
        last_processed_block: outcome.cache.block_info.last_processed_block,
        last_updated: outcome.cache.last_updated,
        stats: outcome.cache.stats,
        cache_error: outcome.cache_error.map(|e| e.to_string()),
    }))
}
