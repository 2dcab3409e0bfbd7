//! API Handlers
//!
//! HTTP request handlers for each worker endpoint. Store calls block on the
//! segment lock, so they run on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::error;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::models::{
    validate_key, CounterResponse, DeleteResponse, DeltaParams, FlushResponse, GetResponse,
    HealthResponse, ManyRequest, ManyResponse, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Store attached to the shared segment
    pub cache: Arc<CacheStore>,
    /// TTL applied to SET requests that carry none
    pub default_ttl: u64,
}

impl AppState {
    /// Creates a new AppState around an attached store.
    pub fn new(cache: CacheStore, default_ttl: u64) -> Self {
        Self {
            cache: Arc::new(cache),
            default_ttl,
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// Attaches to (or creates) the configured segment.
    pub fn from_config(config: &Config) -> Result<Self> {
        let cache = CacheStore::open(config)?;
        Ok(Self::new(cache, config.default_ttl))
    }

    /// Runs a store call on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&CacheStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || f(&cache))
            .await
            .map_err(|e| {
                error!("Cache task failed: {}", e);
                CacheError::Internal(e.to_string())
            })?
    }
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(msg) => Err(CacheError::InvalidRequest(msg)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value under a key with an optional TTL.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl.unwrap_or(state.default_ttl);
    let key = req.key.clone();
    state
        .run(move |cache| cache.put(&req.key, req.value, ttl))
        .await?;

    Ok(Json(SetResponse::new(key)))
}

/// Handler for GET /get/:key
///
/// Retrieves a live value by key.
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    check_key(&key)?;

    let lookup = key.clone();
    let value = state.run(move |cache| cache.get(&lookup)).await?;

    match value {
        Some(payload) => Ok(Json(GetResponse::new(key, payload.to_json()))),
        None => Err(CacheError::NotFound(key)),
    }
}

/// Handler for POST /many
///
/// Retrieves several keys from one snapshot; misses come back as null.
pub async fn many_handler(
    State(state): State<AppState>,
    Json(req): Json<ManyRequest>,
) -> Result<Json<ManyResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let found = state.run(move |cache| cache.get_many(&req.keys)).await?;
    let values = found
        .into_iter()
        .map(|(key, value)| (key, value.map(|payload| payload.to_json())))
        .collect();

    Ok(Json(ManyResponse { values }))
}

/// Handler for POST /incr/:key
///
/// Adds `delta` (default 1) to a counter, creating it when absent.
pub async fn incr_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<DeltaParams>,
) -> Result<Json<CounterResponse>> {
    check_key(&key)?;

    let delta = params.delta.unwrap_or(1);
    let target = key.clone();
    let value = state
        .run(move |cache| cache.increment(&target, delta))
        .await?;

    Ok(Json(CounterResponse { key, value }))
}

/// Handler for POST /decr/:key
///
/// Subtracts `delta` (default 1) from a counter, creating it when absent.
pub async fn decr_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<DeltaParams>,
) -> Result<Json<CounterResponse>> {
    check_key(&key)?;

    let delta = params.delta.unwrap_or(1);
    let target = key.clone();
    let value = state
        .run(move |cache| cache.decrement(&target, delta))
        .await?;

    Ok(Json(CounterResponse { key, value }))
}

/// Handler for DELETE /del/:key
///
/// Forgets a key; 404 when there was nothing to remove.
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    check_key(&key)?;

    let target = key.clone();
    let removed = state.run(move |cache| cache.forget(&target)).await?;

    if removed {
        Ok(Json(DeleteResponse::new(key)))
    } else {
        Err(CacheError::NotFound(key))
    }
}

/// Handler for DELETE /flush
///
/// Removes every entry from the shared segment.
pub async fn flush_handler(State(state): State<AppState>) -> Result<Json<FlushResponse>> {
    state.run(|cache| cache.flush()).await?;
    Ok(Json(FlushResponse::new()))
}

/// Handler for GET /stats
///
/// Returns this worker's counters and the segment's capacities.
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>> {
    let response = state
        .run(|cache| {
            Ok(StatsResponse::new(
                cache.segment().key().raw(),
                cache.requested_capacity(),
                cache.actual_capacity()?,
                cache.stats(),
            ))
        })
        .await?;

    Ok(Json(response))
}

/// Handler for GET /health
///
/// Returns health status of the worker.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
