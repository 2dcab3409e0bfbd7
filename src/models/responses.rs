//! Response DTOs for the worker API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::cache::CacheStats;

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for the SET operation (PUT /set)
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    /// Creates a new SetResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for the DELETE operation (DELETE /del/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for the bulk read (POST /many)
#[derive(Debug, Clone, Serialize)]
pub struct ManyResponse {
    /// Every requested key, null marking a miss
    pub values: HashMap<String, Option<Value>>,
}

/// Response body for POST /incr/:key and POST /decr/:key
#[derive(Debug, Clone, Serialize)]
pub struct CounterResponse {
    /// The counter key
    pub key: String,
    /// Value after the update
    pub value: i64,
}

/// Response body for DELETE /flush
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    /// Success message
    pub message: String,
}

impl FlushResponse {
    /// Creates a new FlushResponse
    pub fn new() -> Self {
        Self {
            message: "Cache flushed successfully".to_string(),
        }
    }
}

impl Default for FlushResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Segment key in hex
    pub segment_key: String,
    /// Configured capacity in bytes
    pub requested_capacity: usize,
    /// Allocated capacity in bytes
    pub actual_capacity: usize,
    /// Counters observed by this worker
    #[serde(flatten)]
    pub counters: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl StatsResponse {
    /// Creates a new StatsResponse from the worker's counters
    pub fn new(
        segment_key: u32,
        requested_capacity: usize,
        actual_capacity: usize,
        counters: CacheStats,
    ) -> Self {
        Self {
            segment_key: format!("{:08x}", segment_key),
            requested_capacity,
            actual_capacity,
            hit_rate: counters.hit_rate(),
            counters,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_response_serialize() {
        let resp = GetResponse::new("test_key", json!({"nested": [1, 2]}));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["key"], "test_key");
        assert_eq!(json["value"]["nested"][1], 2);
    }

    #[test]
    fn test_set_response_serialize() {
        let resp = SetResponse::new("my_key");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("my_key"));
        assert!(json.contains("successfully"));
    }

    #[test]
    fn test_many_response_serializes_misses_as_null() {
        let mut values = HashMap::new();
        values.insert("hit".to_string(), Some(json!(1)));
        values.insert("miss".to_string(), None);

        let json = serde_json::to_value(ManyResponse { values }).unwrap();
        assert_eq!(json["values"]["hit"], 1);
        assert!(json["values"]["miss"].is_null());
    }

    #[test]
    fn test_stats_response_flattens_counters() {
        let counters = CacheStats {
            hits: 80,
            misses: 20,
            resets: 1,
            ..CacheStats::default()
        };
        let resp = StatsResponse::new(0x2a, 320_000, 323_584, counters);
        assert!((resp.hit_rate - 0.8).abs() < 0.001);

        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["segment_key"], "0000002a");
        assert_eq!(json["hits"], 80);
        assert_eq!(json["resets"], 1);
    }

    #[test]
    fn test_health_response_serialize() {
        let resp = HealthResponse::healthy();
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("timestamp"));
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = ErrorResponse::new("Something went wrong");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Something went wrong"));
    }
}
