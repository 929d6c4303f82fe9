//! Process-wide session registry.
//!
//! The [`SessionProvider`] vends one [`StoreSession`] per user id, creating
//! it on first use. It is the sole owner of every session, the shared cache
//! database, and the shared HTTP client, and it drives teardown in order:
//! stop workers → close sessions (final syncs) → release shared resources.
//!
//! Lookup uses a two-level pattern to avoid a thundering herd on first
//! access: a read-locked map check on the fast path, then a locked re-check
//! before construction. Construction errors are returned to the caller and
//! never cached, so the next call may retry.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use tracing::{info, instrument, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::remote::{HttpBackend, OfflineBackend, RemoteBackend, RemoteCredential};
use crate::scheduler;
use crate::session::StoreSession;

/// Process-wide registry of per-user sessions.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct SessionProvider {
    config: Config,

    /// Shared cache database, opened lazily by the first session.
    cache: OnceCell<Arc<CacheStore>>,

    /// Shared HTTP client; per-user credentials are applied per request.
    http: reqwest::Client,

    /// user id → session. Read-mostly after warmup.
    sessions: RwLock<HashMap<String, Arc<StoreSession>>>,
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionProvider {
    /// Creates a provider from a validated configuration.
    ///
    /// The cache database is not opened here; the first `get()` opens it.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: OnceCell::new(),
            http: reqwest::Client::new(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the provider's configuration.
    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session for this user, constructing it on first call.
    ///
    /// Concurrent callers for the same user resolve to the same session
    /// object. The credential is only consulted when a session is actually
    /// constructed; without one (or with the remote disabled) the session
    /// runs against the offline stub.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty user id, or whatever the
    /// cache open / session initialization failed with. Failures are not
    /// cached.
    #[instrument(skip(self, credential))]
    pub async fn get(
        &self,
        user: &str,
        credential: Option<RemoteCredential>,
    ) -> Result<Arc<StoreSession>> {
        if user.is_empty() {
            return Err(ValidationError::required_field("user_id").into());
        }

        // Fast path: read-only map check
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(user) {
                return Ok(Arc::clone(session));
            }
        }

        // Slow path: locked re-check, then construct
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(user) {
            return Ok(Arc::clone(session));
        }

        let cache = self
            .cache
            .get_or_try_init(|| async {
                CacheStore::open(&self.config.cache_root_path).map(Arc::new)
            })
            .await?
            .clone();

        let remote = self.remote_backend_for(credential);
        let session = StoreSession::initialize(user, cache, remote).await?;
        session.attach_scheduler(scheduler::spawn(&session, &self.config));

        sessions.insert(user.to_string(), Arc::clone(&session));
        info!(user = %user, "Session created");
        Ok(session)
    }

    /// Picks the remote backend for a new session.
    fn remote_backend_for(&self, credential: Option<RemoteCredential>) -> Box<dyn RemoteBackend> {
        if !self.config.remote_enabled {
            return Box::new(OfflineBackend);
        }
        match (credential, &self.config.remote_base_url) {
            (Some(credential), Some(base_url)) => Box::new(HttpBackend::new(
                self.http.clone(),
                base_url.clone(),
                credential,
            )),
            _ => {
                warn!("Remote enabled but no credential supplied; using offline stub");
                Box::new(OfflineBackend)
            }
        }
    }

    /// Returns the number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes every session, each performing its bounded final sync, then
    /// releases the provider's shared resources.
    ///
    /// Safe to call more than once; later calls find no sessions. The cache
    /// database closes when the last reference drops.
    #[instrument(skip(self))]
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<StoreSession>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, session)| session).collect()
        };

        let count = sessions.len();
        for session in sessions {
            session.close(self.config.final_sync_timeout).await;
        }

        info!(sessions = count, "Provider shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Company;
    use tempfile::tempdir;

    fn offline_config(dir: &std::path::Path) -> Config {
        Config::offline(dir)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_creates_and_reuses_session() {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(offline_config(dir.path())).unwrap();

        let first = provider.get("alice", None).await.unwrap();
        let second = provider.get("alice", None).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.session_count().await, 1);

        provider.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_distinct_users_get_distinct_sessions() {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(offline_config(dir.path())).unwrap();

        let alice = provider.get("alice", None).await.unwrap();
        let bob = provider.get("bob", None).await.unwrap();

        assert!(!Arc::ptr_eq(&alice, &bob));
        assert_eq!(provider.session_count().await, 2);

        provider.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_user_rejected() {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(offline_config(dir.path())).unwrap();

        let err = provider.get("", None).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_config_rejected() {
        let config = Config {
            remote_enabled: true,
            remote_base_url: None,
            ..Default::default()
        };
        assert!(SessionProvider::new(config).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sessions_share_one_cache_database() {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(offline_config(dir.path())).unwrap();

        let alice = provider.get("alice", None).await.unwrap();
        let bob = provider.get("bob", None).await.unwrap();

        alice.save_company(&Company::new(1, "Acme")).unwrap();
        bob.save_company(&Company::new(1, "Globex")).unwrap();

        // Same numeric id, isolated partitions
        assert_eq!(alice.get_company(1).unwrap().name, "Acme");
        assert_eq!(bob.get_company(1).unwrap().name, "Globex");

        provider.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_all_is_idempotent() {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(offline_config(dir.path())).unwrap();

        provider.get("alice", None).await.unwrap();
        provider.close_all().await;
        assert_eq!(provider.session_count().await, 0);
        provider.close_all().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_enabled_without_credential_falls_back_to_stub() {
        let dir = tempdir().unwrap();
        let config = Config::remote(dir.path(), "https://objects.example.com");
        let provider = SessionProvider::new(config).unwrap();

        // No credential: the session must still come up, cache-only
        let session = provider.get("alice", None).await.unwrap();
        session.save_company(&Company::new(1, "Acme")).unwrap();
        assert!(session.is_dirty());

        provider.close_all().await;
    }
}
