//! Configuration for the storage engine.
//!
//! The [`Config`] struct controls:
//! - Where the shared cache database lives on disk
//! - Whether multi-tenancy and remote backing are enabled
//! - The background sync cadence and retry/backoff envelope
//!
//! # Example
//! ```rust
//! use huntstore::Config;
//! use std::time::Duration;
//!
//! // Offline single-box deployment
//! let config = Config::offline("./data");
//!
//! // Multi-tenant with remote backing
//! let config = Config {
//!     multi_tenant_enabled: true,
//!     remote_enabled: true,
//!     remote_base_url: Some("https://objects.example.com".to_string()),
//!     sync_interval: Duration::from_secs(120),
//!     ..Config::offline("./data")
//! };
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ValidationError;

/// Storage engine configuration options.
///
/// All duration fields have defaults matching the production deployment;
/// use struct update syntax to override specific settings.
#[derive(Clone, Debug)]
pub struct Config {
    /// Filesystem directory for the embedded cache database.
    ///
    /// Created on first session if it does not exist.
    pub cache_root_path: PathBuf,

    /// When false, tenant binding is a no-op and requests carry no session.
    pub multi_tenant_enabled: bool,

    /// When false, every session uses the offline stub backend and serves
    /// from the cache only.
    pub remote_enabled: bool,

    /// Base URL of the remote object store. Required when `remote_enabled`.
    pub remote_base_url: Option<String>,

    /// Period between background sync attempts.
    ///
    /// Default: 5 minutes
    pub sync_interval: Duration,

    /// Initial delay before retrying a failed upload.
    ///
    /// Default: 1 second
    pub sync_retry_base: Duration,

    /// Upper bound on the exponential retry delay.
    ///
    /// Default: 30 seconds
    pub sync_retry_cap: Duration,

    /// Consecutive transport failures tolerated before an attempt gives up.
    /// The next periodic tick retries from scratch.
    ///
    /// Default: 5
    pub sync_retry_max_attempts: u32,

    /// Bound on the close-time final sync.
    ///
    /// Default: 30 seconds
    pub final_sync_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_root_path: PathBuf::from("./data"),
            multi_tenant_enabled: true,
            remote_enabled: false,
            remote_base_url: None,
            sync_interval: Duration::from_secs(300),
            sync_retry_base: Duration::from_secs(1),
            sync_retry_cap: Duration::from_secs(30),
            sync_retry_max_attempts: 5,
            final_sync_timeout: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Creates a new Config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache-only configuration rooted at the given directory.
    ///
    /// Sessions hydrate nothing and never upload; every remote operation
    /// hits the offline stub.
    pub fn offline(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root_path: cache_root.into(),
            remote_enabled: false,
            ..Default::default()
        }
    }

    /// Creates a remote-backed configuration.
    ///
    /// # Example
    /// ```rust
    /// use huntstore::Config;
    ///
    /// let config = Config::remote("./data", "https://objects.example.com");
    /// assert!(config.remote_enabled);
    /// ```
    pub fn remote(cache_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            cache_root_path: cache_root.into(),
            remote_enabled: true,
            remote_base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    /// Validates the configuration.
    ///
    /// Called automatically by `SessionProvider::new()`. You can also call
    /// this explicitly to check configuration before wiring the provider.
    ///
    /// # Errors
    /// Returns `ValidationError` if:
    /// - `sync_interval` or `sync_retry_base` is zero
    /// - `sync_retry_cap` is smaller than `sync_retry_base`
    /// - `sync_retry_max_attempts` is zero
    /// - `remote_enabled` without a `remote_base_url`
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sync_interval.is_zero() {
            return Err(ValidationError::invalid_field(
                "sync_interval",
                "must be greater than zero",
            ));
        }
        if self.sync_retry_base.is_zero() {
            return Err(ValidationError::invalid_field(
                "sync_retry_base",
                "must be greater than zero",
            ));
        }
        if self.sync_retry_cap < self.sync_retry_base {
            return Err(ValidationError::invalid_field(
                "sync_retry_cap",
                "must be at least sync_retry_base",
            ));
        }
        if self.sync_retry_max_attempts == 0 {
            return Err(ValidationError::invalid_field(
                "sync_retry_max_attempts",
                "must be greater than 0",
            ));
        }
        if self.final_sync_timeout.is_zero() {
            return Err(ValidationError::invalid_field(
                "final_sync_timeout",
                "must be greater than zero",
            ));
        }
        if self.remote_enabled && self.remote_base_url.is_none() {
            return Err(ValidationError::required_field("remote_base_url"));
        }

        Ok(())
    }
}
