//! # Huntboard Store
//!
//! Multi-tenant user-data storage engine for the Huntboard job tracker.
//!
//! Each user's records (profile, companies, jobs, match results) live behind
//! a typed per-user session backed by a local embedded cache. Writes hit the
//! cache immediately; a background worker folds dirty state into a
//! compressed, checksum-verified document and uploads it to the user's
//! private remote object. With no remote configured the engine degrades to
//! cache-only operation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use huntstore::{Config, SessionProvider, Company};
//!
//! // One provider per process
//! let provider = SessionProvider::new(Config::offline("./data"))?;
//!
//! // One session per user, created on first use
//! let session = provider.get("alice", None).await?;
//!
//! // Typed cache operations; every write marks the session dirty
//! session.save_company(&Company::new(1, "Acme"))?;
//! let companies = session.list_companies()?;
//!
//! // Upload the dirty state now instead of waiting for the next tick
//! session.sync().await?;
//!
//! // Final syncs + teardown
//! provider.close_all().await;
//! ```
//!
//! ## Key Concepts
//!
//! ### Session
//!
//! A **session** composes one cache partition, one remote object handle,
//! and one background sync worker for a single user. The provider owns all
//! sessions; concurrent lookups for the same user resolve to the same
//! session object.
//!
//! ### Cache partition
//!
//! All users share one embedded [redb](https://docs.rs/redb) database;
//! isolation comes from key prefixing, so no operation can reach another
//! user's data. The cache persists across restarts and is the read path
//! for every request.
//!
//! ### User document
//!
//! The authoritative remote copy is one gzipped JSON document per user,
//! carrying a SHA-256 checksum over its own serialization. A document that
//! fails verification is never overwritten and never hydrated from.
//!
//! ## Thread Safety
//!
//! `SessionProvider` and `StoreSession` are `Send + Sync` and designed to
//! be shared behind `Arc` across request handlers. Writes within one
//! session are linearizable; writes to distinct users proceed in parallel.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

// ============================================================================
// Module declarations
// ============================================================================

mod config;
mod error;
mod model;
mod provider;
mod scheduler;
mod session;
mod tenant;

pub mod cache;
pub mod codec;
pub mod remote;
pub mod retry;

// ============================================================================
// Public API re-exports
// ============================================================================

// Provider and sessions
pub use provider::SessionProvider;
pub use session::StoreSession;

// Configuration
pub use config::Config;

// Error handling
pub use error::{
    CodecError, NotFoundError, RemoteError, Result, StorageError, StoreError, ValidationError,
};

// Domain types
pub use model::{
    Company, Job, JobStatus, MatchResult, Profile, SessionMetadata, UserDataCore, UserDocument,
};

// Remote backend surface (for custom backends and tests)
pub use remote::{HttpBackend, ObjectHandle, OfflineBackend, RemoteBackend, RemoteCredential};

// Cache (for advanced users)
pub use cache::CacheStore;

// Request boundary
pub use tenant::{TenantBinder, TenantContext, SESSION_CONTEXT_KEY};

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Convenient imports for common usage.
///
/// ```rust
/// use huntstore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Result, StoreError};
    pub use crate::model::{Company, Job, JobStatus, MatchResult, Profile};
    pub use crate::provider::SessionProvider;
    pub use crate::session::StoreSession;
    pub use crate::tenant::{TenantBinder, TenantContext};
}
