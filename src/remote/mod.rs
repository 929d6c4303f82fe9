//! Remote object backend abstractions.
//!
//! The authoritative copy of each user's data is a single private object in
//! a remote store. This module provides a trait-based abstraction over that
//! store, allowing different backends to be used (HTTP object store, offline
//! stub, mocks for testing).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    StoreSession                              │
//! │                         │                                    │
//! │                         ▼                                    │
//! │              ┌─────────────────────┐                        │
//! │              │   RemoteBackend     │  ← Trait               │
//! │              └─────────────────────┘                        │
//! │                 ▲        ▲        ▲                         │
//! │      ┌──────────┴┐  ┌────┴─────────┐  ┌┴──────────┐        │
//! │      │HttpBackend│  │OfflineBackend│  │ test mocks│        │
//! │      └───────────┘  └──────────────┘  └───────────┘        │
//! │        (prod)        (remote off)        (test)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every handle is scoped to exactly one user; the engine never mixes users
//! across handles. Uploads are whole-object overwrites.

pub mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use std::fmt;

use crate::error::{RemoteError, Result};

/// An opaque per-user OAuth credential, passed through from the auth layer.
///
/// The token is never logged; `Debug` redacts it.
#[derive(Clone)]
pub struct RemoteCredential(String);

impl RemoteCredential {
    /// Wraps a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for the transport layer.
    pub(crate) fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RemoteCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteCredential").field(&"<redacted>").finish()
    }
}

/// Locator for one user's remote document object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHandle {
    /// The user the object belongs to.
    pub user_id: String,
    /// Backend-specific location (a URL for [`HttpBackend`]).
    pub location: String,
}

/// Contract over the remote per-user blob.
///
/// Implementations must be `Send + Sync`; a session shares its backend with
/// the background sync worker.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Finds the user's document object, creating one that contains an
    /// empty encoded document if none exists yet.
    async fn locate_or_create(&self, user: &str) -> Result<ObjectHandle>;

    /// Returns the opaque object body.
    async fn download(&self, handle: &ObjectHandle) -> Result<Vec<u8>>;

    /// Replaces the object body atomically (whole-object write).
    async fn upload(&self, handle: &ObjectHandle, bytes: Vec<u8>) -> Result<()>;
}

/// Stub backend used when remote backing is disabled or the caller has no
/// credential. Every operation returns [`RemoteError::NotImplemented`],
/// which keeps the session in cache-only mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineBackend;

#[async_trait]
impl RemoteBackend for OfflineBackend {
    async fn locate_or_create(&self, _user: &str) -> Result<ObjectHandle> {
        Err(RemoteError::NotImplemented.into())
    }

    async fn download(&self, _handle: &ObjectHandle) -> Result<Vec<u8>> {
        Err(RemoteError::NotImplemented.into())
    }

    async fn upload(&self, _handle: &ObjectHandle, _bytes: Vec<u8>) -> Result<()> {
        Err(RemoteError::NotImplemented.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[tokio::test]
    async fn test_offline_backend_is_not_implemented() {
        let backend = OfflineBackend;

        let err = backend.locate_or_create("alice").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Remote(RemoteError::NotImplemented)
        ));

        let handle = ObjectHandle {
            user_id: "alice".to_string(),
            location: "nowhere".to_string(),
        };
        assert!(backend.download(&handle).await.is_err());
        assert!(backend.upload(&handle, Vec::new()).await.is_err());
    }

    #[test]
    fn test_credential_debug_redacts_token() {
        let cred = RemoteCredential::new("ya29.secret-token");
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_offline_errors_disable_sync() {
        let err: StoreError = RemoteError::NotImplemented.into();
        assert!(err.disables_sync());
        assert!(!err.is_retryable());
    }
}
