//! Cache schema: table definitions, versioning, and the per-user key layout.
//!
//! All user partitions live in one redb table keyed by strings. Entity-type
//! prefixes and the trailing numeric company id keep keys collision-free
//! across users and types without any key parsing.
//!
//! # Key Layout
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────────┐
//! │ p:<user>         │ JSON Profile                                 │
//! │ c:<user>         │ JSON Vec<Company>, insertion order           │
//! │ j:<user>:<cid>   │ JSON Vec<Job> for one company                │
//! │ m:<user>         │ JSON Vec<MatchResult>, newest first          │
//! │ meta:<user>      │ JSON SessionMetadata                         │
//! └──────────────────┴──────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use redb::TableDefinition;
use serde::{Deserialize, Serialize};

/// Current cache schema version.
///
/// Increment this when making breaking changes to the key layout or value
/// encodings. The cache will refuse to open if versions don't match.
pub const SCHEMA_VERSION: u32 = 1;

/// Table holding every user partition.
///
/// Key: prefixed string (see module docs)
/// Value: JSON-serialized entity or entity list
pub const USER_DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("user_data");

/// Table for cache-level bookkeeping.
pub const STORE_META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("store_meta");

/// Key of the [`StoreMetadata`] row in [`STORE_META_TABLE`].
pub const STORE_META_KEY: &str = "store_metadata";

// ============================================================================
// Key helpers
// ============================================================================

/// Key of the user's profile record.
#[inline]
pub fn profile_key(user: &str) -> String {
    format!("p:{user}")
}

/// Key of the user's company list.
#[inline]
pub fn companies_key(user: &str) -> String {
    format!("c:{user}")
}

/// Key of the job list for one of the user's companies.
#[inline]
pub fn jobs_key(user: &str, company_id: i64) -> String {
    format!("j:{user}:{company_id}")
}

/// Key of the user's match-result list.
#[inline]
pub fn matches_key(user: &str) -> String {
    format!("m:{user}")
}

/// Key of the user's session metadata.
#[inline]
pub fn metadata_key(user: &str) -> String {
    format!("meta:{user}")
}

// ============================================================================
// Store metadata
// ============================================================================

/// Cache-level metadata stored under [`STORE_META_KEY`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Schema version for compatibility checking.
    pub schema_version: u32,

    /// When the cache database was created.
    pub created_at: DateTime<Utc>,

    /// Last time the cache was opened (updated on each open).
    pub last_opened_at: DateTime<Utc>,
}

impl StoreMetadata {
    /// Creates metadata for a fresh cache database.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION,
            created_at: now,
            last_opened_at: now,
        }
    }

    /// Updates the last_opened_at timestamp.
    pub fn touch(&mut self) {
        self.last_opened_at = Utc::now();
    }
}

impl Default for StoreMetadata {
    fn default() -> Self {
        Self::new()
    }
}
