//! Error types for the shared cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::CodecError;
use crate::models::ErrorResponse;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its HTTP host.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The shared segment could not be created, opened, read or written
    #[error("Segment unavailable at {path}: {source}")]
    SegmentUnavailable {
        /// Backing path of the segment
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A blob larger than the segment was handed to the segment writer
    #[error("Blob of {len} bytes exceeds segment capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Length of the rejected blob
        len: usize,
        /// Actual capacity of the segment
        capacity: usize,
    },

    /// The cross-process lock could not be obtained at all
    #[error("Lock unavailable at {path}: {source}")]
    LockUnavailable {
        /// Backing path of the lock
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The lock was still held elsewhere when the configured wait elapsed
    #[error("Timed out after {0:?} waiting for the segment lock")]
    LockTimeout(Duration),

    /// The segment content could not be decoded (strict mode only)
    #[error("Segment content is corrupt: {0}")]
    Decode(#[from] CodecError),

    /// The cache map could not be encoded
    #[error("Failed to encode cache map: {0}")]
    Encode(String),

    /// A stored value does not deserialize into the requested type
    #[error("Value for key '{key}' has an unexpected shape: {reason}")]
    UnexpectedShape {
        /// Key that was read
        key: String,
        /// Deserializer message
        reason: String,
    },

    /// Increment or decrement on a value with no integer reading
    #[error("Value for key '{0}' is not numeric")]
    NotNumeric(String),

    /// Increment or decrement would leave the i64 range
    #[error("Integer overflow on key '{0}'")]
    IntegerOverflow(String),

    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::NotNumeric(_)
            | CacheError::IntegerOverflow(_)
            | CacheError::UnexpectedShape { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CacheError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::SegmentUnavailable { .. }
            | CacheError::CapacityExceeded { .. }
            | CacheError::LockUnavailable { .. }
            | CacheError::Decode(_)
            | CacheError::Encode(_)
            | CacheError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
