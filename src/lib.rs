//! shmcache - A key-value cache shared between processes on one host
//!
//! The whole cache lives in one fixed-capacity segment. Reads are lock
//! free, writes are serialized by a cross-process lock, entries expire
//! lazily, and a segment that overflows is garbage collected and, failing
//! that, reset.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;

pub use api::AppState;
pub use cache::{CacheStore, Payload};
pub use config::Config;
pub use error::{CacheError, Result};
