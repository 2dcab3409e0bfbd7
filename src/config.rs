//! Configuration Module
//!
//! Handles loading the segment, lock and worker settings from environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{SegmentKey, NAMESPACE};

/// Default requested segment capacity in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 320_000;

/// Default permission bits for a newly created segment (rw-r--r--).
pub const DEFAULT_PERMISSIONS: u32 = 0o644;

/// Default discriminator mixed into the derived segment key.
pub const DEFAULT_DISCRIMINATOR: &str = "default";

/// Cache and worker configuration parameters.
///
/// Every process built from the same values attaches to the same segment
/// and the same lock.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit segment key, overrides the derived one
    pub segment_key: Option<u32>,
    /// Mixed into the derived segment key when no explicit key is set
    pub discriminator: String,
    /// Requested segment capacity in bytes
    pub segment_size: usize,
    /// Permission bits applied when the segment and lock are created.
    ///
    /// Also shapes the default directory when it has to be created. A
    /// segment replaced through a sticky directory (such as `/dev/shm`
    /// itself) stays writable only by its owner, whatever these bits say.
    pub permissions: u32,
    /// Directory holding the segment and lock files
    pub directory: PathBuf,
    /// Bounded wait for the lock, None blocks indefinitely
    pub lock_timeout: Option<Duration>,
    /// Surface undecodable segment content as an error instead of an empty cache
    pub strict_decode: bool,
    /// TTL in seconds applied by the HTTP worker when a request has none (0 = forever)
    pub default_ttl: u64,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SHMCACHE_SEGMENT_KEY` - Explicit key, decimal or `0x` hex (default: derived)
    /// - `SHMCACHE_DISCRIMINATOR` - Key discriminator (default: "default")
    /// - `SHMCACHE_SEGMENT_SIZE` - Requested capacity in bytes (default: 320000)
    /// - `SHMCACHE_PERMISSIONS` - Octal permission bits (default: 0644)
    /// - `SHMCACHE_DIR` - Segment directory (default: /dev/shm/shmcache, else under the temp dir)
    /// - `SHMCACHE_LOCK_TIMEOUT_MS` - Lock wait bound in ms (default: unbounded)
    /// - `SHMCACHE_STRICT_DECODE` - `true` to report corrupt content (default: false)
    /// - `DEFAULT_TTL` - Worker default TTL in seconds (default: 0)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            segment_key: env::var("SHMCACHE_SEGMENT_KEY")
                .ok()
                .and_then(|v| parse_segment_key(&v)),
            discriminator: env::var("SHMCACHE_DISCRIMINATOR")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.discriminator),
            segment_size: env::var("SHMCACHE_SEGMENT_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|size| *size > 0)
                .unwrap_or(defaults.segment_size),
            permissions: env::var("SHMCACHE_PERMISSIONS")
                .ok()
                .and_then(|v| parse_permissions(&v))
                .unwrap_or(defaults.permissions),
            directory: env::var("SHMCACHE_DIR")
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.directory),
            lock_timeout: env::var("SHMCACHE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis),
            strict_decode: env::var("SHMCACHE_STRICT_DECODE")
                .ok()
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.strict_decode),
            default_ttl: env::var("DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.default_ttl),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
        }
    }

    /// Returns the configuration rooted at another directory.
    pub fn with_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Returns the configuration with another requested segment size.
    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size;
        self
    }

    /// Returns the configuration with a bounded lock wait.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Returns the configuration with strict decoding switched on or off.
    pub fn with_strict_decode(mut self, strict: bool) -> Self {
        self.strict_decode = strict;
        self
    }

    /// Resolves the segment key: the explicit override, or one derived from the discriminator.
    pub fn resolved_key(&self) -> SegmentKey {
        match self.segment_key {
            Some(raw) => SegmentKey::from_raw(raw),
            None => SegmentKey::derive(&self.discriminator),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_key: None,
            discriminator: DEFAULT_DISCRIMINATOR.to_string(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            permissions: DEFAULT_PERMISSIONS,
            directory: default_directory(),
            lock_timeout: None,
            strict_decode: false,
            default_ttl: 0,
            server_port: 3000,
        }
    }
}

/// A `shmcache` directory on the tmpfs mount, else in the temp dir.
///
/// `/dev/shm` itself is sticky, which would stop other users from
/// replacing a segment they are allowed to write.
fn default_directory() -> PathBuf {
    let shm = Path::new("/dev/shm");
    let base = if shm.is_dir() {
        shm.to_path_buf()
    } else {
        env::temp_dir()
    };
    base.join(NAMESPACE)
}

fn parse_segment_key(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn parse_permissions(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0o").unwrap_or(raw);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.segment_key, None);
        assert_eq!(config.discriminator, "default");
        assert_eq!(config.segment_size, 320_000);
        assert_eq!(config.permissions, 0o644);
        assert!(config.lock_timeout.is_none());
        assert!(!config.strict_decode);
        assert_eq!(config.default_ttl, 0);
        assert_eq!(config.server_port, 3000);
        assert!(config.directory.ends_with(NAMESPACE));
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("SHMCACHE_SEGMENT_KEY");
        env::remove_var("SHMCACHE_DISCRIMINATOR");
        env::remove_var("SHMCACHE_SEGMENT_SIZE");
        env::remove_var("SHMCACHE_PERMISSIONS");
        env::remove_var("SHMCACHE_LOCK_TIMEOUT_MS");
        env::remove_var("SHMCACHE_STRICT_DECODE");

        let config = Config::from_env();
        assert_eq!(config.segment_key, None);
        assert_eq!(config.discriminator, "default");
        assert_eq!(config.segment_size, 320_000);
        assert_eq!(config.permissions, 0o644);
        assert!(config.lock_timeout.is_none());
        assert!(!config.strict_decode);
    }

    #[test]
    fn test_parse_segment_key() {
        assert_eq!(parse_segment_key("42"), Some(42));
        assert_eq!(parse_segment_key("0x2a"), Some(42));
        assert_eq!(parse_segment_key("0XFF"), Some(255));
        assert_eq!(parse_segment_key("nope"), None);
    }

    #[test]
    fn test_parse_permissions() {
        assert_eq!(parse_permissions("0644"), Some(0o644));
        assert_eq!(parse_permissions("600"), Some(0o600));
        assert_eq!(parse_permissions("0o660"), Some(0o660));
        assert_eq!(parse_permissions("0999"), None);
        assert_eq!(parse_permissions("7777"), None);
    }

    #[test]
    fn test_resolved_key_prefers_override() {
        let mut config = Config::default();
        let derived = config.resolved_key();
        assert_eq!(derived, SegmentKey::derive("default"));

        config.segment_key = Some(0xfeed);
        assert_eq!(config.resolved_key(), SegmentKey::from_raw(0xfeed));
    }
}
