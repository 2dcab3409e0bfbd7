//! API Module
//!
//! HTTP handlers and routing for a cache worker. Every worker started with
//! the same cache configuration serves the same shared segment.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value
//! - `GET /get/:key` - Retrieve a value by key
//! - `POST /many` - Retrieve several keys at once
//! - `POST /incr/:key`, `POST /decr/:key` - Update a counter
//! - `DELETE /del/:key` - Forget a key
//! - `DELETE /flush` - Remove every key
//! - `GET /stats` - Worker counters
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
