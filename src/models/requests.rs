//! Request DTOs for the worker API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

/// Longest key the worker accepts, in bytes.
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for the SET operation (PUT /set)
///
/// # Fields
/// - `key`: The cache key to store the value under
/// - `value`: Any JSON value
/// - `ttl`: Optional TTL in seconds (uses the worker default if not specified, 0 = forever)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for the bulk read (POST /many)
#[derive(Debug, Clone, Deserialize)]
pub struct ManyRequest {
    /// Keys to look up
    pub keys: Vec<String>,
}

impl ManyRequest {
    /// Validates every requested key
    pub fn validate(&self) -> Option<String> {
        self.keys.iter().find_map(|key| validate_key(key))
    }
}

/// Query string for POST /incr/:key and POST /decr/:key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeltaParams {
    /// Amount to add or subtract (default: 1)
    #[serde(default)]
    pub delta: Option<i64>,
}

/// Checks the key rules shared by every endpoint.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}
