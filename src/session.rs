//! Per-user storage session.
//!
//! A [`StoreSession`] composes one cache partition, one remote object
//! handle, and the document codec behind a typed per-user surface. Writes
//! go through to the cache and mark the session dirty; a background worker
//! (or an explicit [`sync`](StoreSession::sync) call) periodically folds
//! the dirty cache state into a fresh document and uploads it.
//!
//! Sync state machine:
//!
//! ```text
//!            mutate()              sync() ok
//! clean ───────────────▶ dirty ─────────────▶ clean
//!             ▲                │
//!             └─ sync() err ───┘
//! ```
//!
//! `sync()` is idempotent when clean. A write that lands while an upload is
//! in flight is not part of that upload's snapshot and leaves the session
//! dirty for the next cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cache::CacheStore;
use crate::codec;
use crate::error::{CodecError, Result, StorageError, ValidationError};
use crate::model::{
    Company, Job, MatchResult, Profile, SessionMetadata, UserDataCore, UserDocument,
};
use crate::remote::{ObjectHandle, RemoteBackend};
use crate::scheduler::SchedulerHandle;

/// The per-user composition of cache partition, remote handle, and sync
/// bookkeeping.
///
/// Sessions are created and owned by the
/// [`SessionProvider`](crate::provider::SessionProvider); request handlers
/// receive an `Arc` and treat it as the user's storage.
pub struct StoreSession {
    /// The bound user id. Set once at initialization, never changed.
    user_id: String,

    /// Shared cache database; this session only touches its own key prefix.
    cache: Arc<CacheStore>,

    /// Remote backend driving hydration and uploads.
    remote: Box<dyn RemoteBackend>,

    /// Located remote object, cached after the first successful lookup.
    handle: tokio::sync::Mutex<Option<ObjectHandle>>,

    /// In-memory sync bookkeeping; the persisted copy is best-effort.
    metadata: RwLock<SessionMetadata>,

    /// Bumped on every mutation; lets `sync()` detect writes that landed
    /// while an upload was in flight.
    dirty_epoch: AtomicU64,

    /// Set when hydration found an unreadable remote document. While set,
    /// `sync()` refuses to overwrite the remote copy.
    remote_corrupt: AtomicBool,

    /// Background worker handle, attached by the provider after spawn.
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl std::fmt::Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("user_id", &self.user_id)
            .field("is_dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl StoreSession {
    /// Creates and initializes a session for one user.
    ///
    /// Binds the user id, loads or creates metadata, then attempts a
    /// best-effort hydration of an empty cache partition from the remote
    /// document. Hydration failures are logged and swallowed; the session
    /// proceeds in cache-only mode.
    ///
    /// A missing metadata row over a non-empty partition means a previous
    /// process died before persisting the flag; the session then assumes
    /// dirty and force-syncs on the next cycle.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty user id, or a storage error
    /// if the cache cannot be read.
    #[instrument(skip(cache, remote))]
    pub async fn initialize(
        user_id: &str,
        cache: Arc<CacheStore>,
        remote: Box<dyn RemoteBackend>,
    ) -> Result<Arc<Self>> {
        if user_id.is_empty() {
            return Err(ValidationError::required_field("user_id").into());
        }

        let partition_empty = cache.partition_is_empty(user_id)?;
        let metadata = match cache.load_metadata(user_id)? {
            Some(meta) => meta,
            None => {
                let mut meta = SessionMetadata::new(user_id);
                meta.is_dirty = !partition_empty;
                cache.save_metadata(user_id, &meta)?;
                meta
            }
        };

        let session = Arc::new(Self {
            user_id: user_id.to_string(),
            cache,
            remote,
            handle: tokio::sync::Mutex::new(None),
            metadata: RwLock::new(metadata),
            dirty_epoch: AtomicU64::new(0),
            remote_corrupt: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        });

        // Hydration only fills a fresh partition; existing local data is
        // authoritative until the next upload.
        if partition_empty {
            session.hydrate().await;
        }

        info!(user = %session.user_id, dirty = session.is_dirty(), "Session initialized");
        Ok(session)
    }

    /// Returns the bound user id.
    #[inline]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns whether cache state has diverged from the last upload.
    pub fn is_dirty(&self) -> bool {
        self.metadata
            .read()
            .map(|meta| meta.is_dirty)
            .unwrap_or(true)
    }

    /// Returns the wall clock at the start of the last successful upload.
    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.read().ok().and_then(|meta| meta.last_sync)
    }

    /// Attaches the background worker handle. Called once by the provider.
    pub(crate) fn attach_scheduler(&self, handle: SchedulerHandle) {
        if let Ok(mut slot) = self.scheduler.lock() {
            *slot = Some(handle);
        }
    }

    /// Asks the background worker for an out-of-band sync.
    ///
    /// No-op for sessions without a worker (offline tests, teardown races).
    pub fn trigger_sync(&self) {
        if let Ok(slot) = self.scheduler.lock() {
            if let Some(handle) = slot.as_ref() {
                handle.trigger();
            }
        }
    }

    // =========================================================================
    // Hydration
    // =========================================================================

    /// Best-effort initial hydration from the remote document.
    async fn hydrate(&self) {
        match self.try_hydrate().await {
            Ok(counts) => {
                if counts > 0 {
                    info!(user = %self.user_id, entities = counts, "Hydrated cache from remote");
                }
            }
            Err(err) if err.is_corrupt() => {
                self.remote_corrupt.store(true, Ordering::SeqCst);
                warn!(
                    user = %self.user_id,
                    error = %err,
                    "Remote document is corrupt; staying cache-only and refusing to overwrite it"
                );
            }
            Err(err) => {
                warn!(
                    user = %self.user_id,
                    error = %err,
                    "Hydration failed; proceeding in cache-only mode"
                );
            }
        }
    }

    /// Downloads, decodes, and writes the remote document into the cache.
    ///
    /// Returns the number of entities written. Writes here deliberately
    /// bypass [`mark_dirty`](Self::mark_dirty): the cache mirrors the
    /// remote exactly after hydration.
    async fn try_hydrate(&self) -> Result<usize> {
        let handle = self.ensure_handle().await?;
        let bytes = self.remote.download(&handle).await?;
        let doc = codec::decode(&bytes)?;

        let mut written = 0usize;

        if let Some(profile) = &doc.data.profile {
            self.cache.save_profile(&self.user_id, profile)?;
            written += 1;
        }
        for company in &doc.data.companies {
            self.cache.save_company(&self.user_id, company)?;
            written += 1;
        }
        for job in &doc.data.jobs {
            self.cache.save_job(&self.user_id, job)?;
            written += 1;
        }
        // The document stores matches newest-first; prepending in reverse
        // restores that order in the cache.
        for result in doc.data.matches.iter().rev() {
            self.cache.save_match(&self.user_id, result)?;
            written += 1;
        }

        Ok(written)
    }

    /// Returns the remote object handle, locating or creating it once.
    async fn ensure_handle(&self) -> Result<ObjectHandle> {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.clone());
        }
        let handle = self.remote.locate_or_create(&self.user_id).await?;
        *slot = Some(handle.clone());
        Ok(handle)
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// Marks the session dirty after a successful mutation.
    ///
    /// The in-memory flag is authoritative; persisting it is best-effort
    /// (a restart that loses it falls back to assume-dirty).
    fn mark_dirty(&self) {
        self.dirty_epoch.fetch_add(1, Ordering::SeqCst);

        let snapshot = match self.metadata.write() {
            Ok(mut meta) => {
                meta.is_dirty = true;
                meta.clone()
            }
            Err(_) => return,
        };
        if let Err(err) = self.cache.save_metadata(&self.user_id, &snapshot) {
            warn!(user = %self.user_id, error = %err, "Failed to persist dirty flag");
        }
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Retrieves the user's profile. See [`CacheStore::get_profile`].
    pub fn get_profile(&self) -> Result<Profile> {
        self.cache.get_profile(&self.user_id)
    }

    /// Saves the user's profile and marks the session dirty.
    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        self.cache.save_profile(&self.user_id, profile)?;
        self.mark_dirty();
        Ok(())
    }

    // =========================================================================
    // Companies
    // =========================================================================

    /// Lists companies in insertion order.
    pub fn list_companies(&self) -> Result<Vec<Company>> {
        self.cache.list_companies(&self.user_id)
    }

    /// Retrieves one company by id.
    pub fn get_company(&self, id: i64) -> Result<Company> {
        self.cache.get_company(&self.user_id, id)
    }

    /// Inserts or updates a company and marks the session dirty.
    pub fn save_company(&self, company: &Company) -> Result<()> {
        self.cache.save_company(&self.user_id, company)?;
        self.mark_dirty();
        Ok(())
    }

    /// Deletes a company (cascading) and marks the session dirty.
    pub fn delete_company(&self, id: i64) -> Result<()> {
        self.cache.delete_company(&self.user_id, id)?;
        self.mark_dirty();
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Lists jobs under one company.
    pub fn list_jobs(&self, company_id: i64) -> Result<Vec<Job>> {
        self.cache.list_jobs(&self.user_id, company_id)
    }

    /// Retrieves one job by id.
    pub fn get_job(&self, job_id: i64) -> Result<Job> {
        self.cache.get_job(&self.user_id, job_id)
    }

    /// Inserts or updates a job and marks the session dirty.
    pub fn save_job(&self, job: &Job) -> Result<()> {
        self.cache.save_job(&self.user_id, job)?;
        self.mark_dirty();
        Ok(())
    }

    /// Deletes a job (cascading to matches) and marks the session dirty.
    pub fn delete_job(&self, job_id: i64) -> Result<()> {
        self.cache.delete_job(&self.user_id, job_id)?;
        self.mark_dirty();
        Ok(())
    }

    // =========================================================================
    // Matches
    // =========================================================================

    /// Saves a match result (newest first) and marks the session dirty.
    pub fn save_match(&self, result: &MatchResult) -> Result<()> {
        self.cache.save_match(&self.user_id, result)?;
        self.mark_dirty();
        Ok(())
    }

    /// Lists match results, newest first, up to `limit`.
    pub fn list_matches(&self, limit: Option<usize>) -> Result<Vec<MatchResult>> {
        self.cache.list_matches(&self.user_id, limit)
    }

    /// Retrieves one match result by id.
    pub fn get_match(&self, id: i64) -> Result<MatchResult> {
        self.cache.get_match(&self.user_id, id)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Uploads the current cache state as a fresh document.
    ///
    /// No-op when the session is clean. On success, `last_sync` advances to
    /// the wall clock at sync start and the dirty flag clears. If a write
    /// landed during the upload the session stays dirty for the next cycle.
    ///
    /// # Errors
    ///
    /// Codec errors and a corrupt remote are fatal for the cycle and never
    /// retried here; transport errors propagate for the scheduler's backoff
    /// to handle.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn sync(&self) -> Result<()> {
        if !self.is_dirty() {
            debug!("Session clean; skipping sync");
            return Ok(());
        }
        if self.remote_corrupt.load(Ordering::SeqCst) {
            return Err(CodecError::malformed(
                "remote document is corrupt; refusing to overwrite it",
            )
            .into());
        }

        let started_at = Utc::now();
        let epoch = self.dirty_epoch.load(Ordering::SeqCst);

        let mut doc = self.assemble_document()?;
        let bytes = codec::encode(&mut doc)?;

        let handle = self.ensure_handle().await?;
        self.remote.upload(&handle, bytes).await?;

        let snapshot = {
            let mut meta = self
                .metadata
                .write()
                .map_err(|_| StorageError::transaction("session metadata lock poisoned"))?;
            meta.last_sync = Some(started_at);
            if self.dirty_epoch.load(Ordering::SeqCst) == epoch {
                meta.is_dirty = false;
            }
            meta.clone()
        };
        self.cache.save_metadata(&self.user_id, &snapshot)?;

        info!(
            companies = doc.data.companies.len(),
            jobs = doc.data.jobs.len(),
            matches = doc.data.matches.len(),
            still_dirty = snapshot.is_dirty,
            "Sync complete"
        );
        Ok(())
    }

    /// Snapshots the cache into a document: profile, companies in order,
    /// jobs concatenated in company order, matches newest-first.
    fn assemble_document(&self) -> Result<UserDocument> {
        let profile = match self.cache.get_profile(&self.user_id) {
            Ok(profile) => Some(profile),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err),
        };

        let companies = self.cache.list_companies(&self.user_id)?;
        let mut jobs = Vec::new();
        for company in &companies {
            jobs.extend(self.cache.list_jobs(&self.user_id, company.id)?);
        }

        let matches = match self.cache.list_matches(&self.user_id, None) {
            Ok(matches) => matches,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };

        Ok(UserDocument {
            updated_at: Utc::now(),
            checksum: String::new(),
            data: UserDataCore {
                profile,
                companies,
                jobs,
                matches,
            },
        })
    }

    /// Runs one final sync bounded by `timeout`, logging instead of failing.
    pub(crate) async fn final_sync(&self, timeout: Duration) {
        if !self.is_dirty() {
            return;
        }
        match tokio::time::timeout(timeout, self.sync()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(user = %self.user_id, error = %err, "Final sync failed; tearing down anyway")
            }
            Err(_) => {
                warn!(user = %self.user_id, ?timeout, "Final sync timed out; tearing down anyway")
            }
        }
    }

    /// Closes the session: stops the background worker (which runs the
    /// bounded final sync) and releases the cache partition reference.
    ///
    /// The shared cache database stays open; the provider owns it.
    #[instrument(skip(self), fields(user = %self.user_id))]
    pub async fn close(&self, final_sync_timeout: Duration) {
        let worker = self.scheduler.lock().ok().and_then(|mut slot| slot.take());
        match worker {
            Some(handle) => handle.shutdown().await,
            None => self.final_sync(final_sync_timeout).await,
        }
        info!("Session closed");
    }
}
