//! API Routes
//!
//! Configures the Axum router with all worker endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    decr_handler, delete_handler, flush_handler, get_handler, health_handler, incr_handler,
    many_handler, set_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `PUT /set` - Store a JSON value
/// - `GET /get/:key` - Retrieve a value by key
/// - `POST /many` - Retrieve several keys at once
/// - `POST /incr/:key` - Increment a counter (`?delta=n`)
/// - `POST /decr/:key` - Decrement a counter (`?delta=n`)
/// - `DELETE /del/:key` - Forget a key
/// - `DELETE /flush` - Remove every key
/// - `GET /stats` - Worker counters and segment capacities
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router with all endpoints
    Router::new()
        .route("/set", put(set_handler))
        .route("/get/:key", get(get_handler))
        .route("/many", post(many_handler))
        .route("/incr/:key", post(incr_handler))
        .route("/decr/:key", post(decr_handler))
        .route("/del/:key", delete(delete_handler))
        .route("/flush", delete(flush_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
