//! Cache Entry Module
//!
//! Defines the stored payload and the entry wrapping it with an absolute expiry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// == Payload ==
/// A cached value.
///
/// Integers take the compact `Int` form; everything else is kept as a
/// structured JSON value. Build payloads through the `From` impls so JSON
/// integers are always normalised to `Int`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// Signed integer, encoded as a bare integer
    Int(i64),
    /// Any other value, including nested arrays and objects.
    ///
    /// Never holds an integer that fits `i64`: such a value comes back from
    /// the segment as `Int`. Build it with `Payload::from` to stay normalised.
    Structured(Value),
}

impl Payload {
    /// Returns the integer reading of this payload, if it has one.
    ///
    /// Floats are truncated, numeric strings are parsed, booleans map to
    /// 1/0 and null to 0. Arrays, objects and non-numeric strings have none.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Payload::Int(n) => Some(*n),
            Payload::Structured(value) => match value {
                Value::Null => Some(0),
                Value::Bool(b) => Some(i64::from(*b)),
                Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate)),
                Value::String(s) => {
                    let s = s.trim();
                    s.parse::<i64>()
                        .ok()
                        .or_else(|| s.parse::<f64>().ok().and_then(truncate))
                }
                Value::Array(_) | Value::Object(_) => None,
            },
        }
    }

    /// Converts the payload into a JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            Payload::Int(n) => Value::from(*n),
            Payload::Structured(value) => value.clone(),
        }
    }
}

fn truncate(f: f64) -> Option<i64> {
    if f.is_finite() && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f.trunc() as i64)
    } else {
        None
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value.as_i64() {
            Some(n) => Payload::Int(n),
            None => Payload::Structured(value),
        }
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Int(n)
    }
}

impl From<i32> for Payload {
    fn from(n: i32) -> Self {
        Payload::Int(i64::from(n))
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Structured(Value::String(s.to_string()))
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Structured(Value::String(s))
    }
}

// == Cache Entry ==
/// A payload paired with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// The stored value
    #[serde(rename = "v")]
    pub value: Payload,
    /// Expiration as UNIX seconds, 0 = never expires
    #[serde(rename = "e", default)]
    pub expires_at: i64,
}

impl Entry {
    // == Constructor ==
    /// Creates an entry that expires `ttl_seconds` after `now`.
    ///
    /// A TTL of zero stores the entry forever.
    pub fn new(value: Payload, ttl_seconds: u64, now: i64) -> Self {
        Self {
            value,
            expires_at: expiration(ttl_seconds, now),
        }
    }

    /// Creates an entry that never expires.
    pub fn forever(value: Payload) -> Self {
        Self {
            value,
            expires_at: 0,
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// An entry is still live during the second it expires at; it is
    /// expired once `now` is strictly past `expires_at`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at != 0 && now > self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL in seconds, or None if no expiration is set.
    pub fn ttl_remaining(&self, now: i64) -> Option<i64> {
        if self.expires_at == 0 {
            None
        } else {
            Some((self.expires_at - now).max(0))
        }
    }
}

/// Converts a relative TTL into an absolute expiry, 0 meaning never.
pub fn expiration(ttl_seconds: u64, now: i64) -> i64 {
    if ttl_seconds == 0 {
        return 0;
    }
    let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
    now.saturating_add(ttl)
}
