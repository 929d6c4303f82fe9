//! Local write-through cache for per-user data.
//!
//! One embedded [redb](https://docs.rs/redb) database holds every user's
//! partition; partitions are isolated by key prefixing, not by separate
//! handles. The cache is crash-safe (ACID transactions) and persists across
//! restarts.
//!
//! # Concurrency
//!
//! redb gives MVCC snapshot reads and a single global writer. On top of
//! that, every compound read-modify-write sequence (`save_*`, `delete_*`)
//! holds a per-user mutex so two writers to the same partition cannot
//! interleave between the read and the write. Operations on distinct users
//! proceed in parallel.
//!
//! # Atomicity
//!
//! Cascading deletes touch several keys; each such sequence runs inside a
//! single redb write transaction, so a crash mid-cascade leaves either the
//! old state or the new state, never a job without its company.

pub mod keys;

pub use keys::{StoreMetadata, SCHEMA_VERSION};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use redb::{Database, ReadableTable, Table};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::{NotFoundError, Result, StorageError, ValidationError};
use crate::model::{Company, Job, MatchResult, Profile, SessionMetadata};
use keys::{
    companies_key, jobs_key, matches_key, metadata_key, profile_key, STORE_META_KEY,
    STORE_META_TABLE, USER_DATA_TABLE,
};

/// Filename of the cache database inside `cache_root_path`.
const CACHE_FILE_NAME: &str = "huntboard-cache.redb";

/// The shared embedded cache.
///
/// One instance per process, shared by every session through an `Arc`.
/// Closing a session never closes the store; the provider owns teardown.
pub struct CacheStore {
    /// The redb database handle.
    db: Database,

    /// Cached store-level metadata.
    metadata: StoreMetadata,

    /// Path to the database file.
    path: PathBuf,

    /// Per-user write locks, created lazily on first mutation.
    partitions: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path", &self.path)
            .field("schema_version", &self.metadata.schema_version)
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Opens or creates the cache database under the given directory.
    ///
    /// The directory is created if missing. An existing cache is validated
    /// against [`SCHEMA_VERSION`] and has its `last_opened_at` touched.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// file is corrupted or locked, or the schema version doesn't match.
    #[instrument(fields(dir = %dir.as_ref().display()))]
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let path = dir.join(CACHE_FILE_NAME);
        let db_exists = path.exists();

        debug!(db_exists = db_exists, "Opening cache store");

        let db = Database::builder().create(&path).map_err(|e| {
            if e.to_string().contains("locked") {
                StorageError::DatabaseLocked
            } else {
                StorageError::Redb(e.to_string())
            }
        })?;

        let metadata = if db_exists {
            Self::validate_existing(&db)?
        } else {
            Self::initialize_new(&db)?
        };

        info!(
            schema_version = metadata.schema_version,
            "Cache store opened"
        );

        Ok(Self {
            db,
            metadata,
            path,
            partitions: RwLock::new(HashMap::new()),
        })
    }

    /// Initializes tables and metadata for a fresh database.
    fn initialize_new(db: &Database) -> Result<StoreMetadata> {
        let metadata = StoreMetadata::new();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let mut meta_table = write_txn.open_table(STORE_META_TABLE)?;
            let bytes = serde_json::to_vec(&metadata).map_err(StorageError::from)?;
            meta_table.insert(STORE_META_KEY, bytes.as_slice())?;

            let _ = write_txn.open_table(USER_DATA_TABLE)?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        Ok(metadata)
    }

    /// Reads, validates, and touches metadata on an existing database.
    fn validate_existing(db: &Database) -> Result<StoreMetadata> {
        let read_txn = db.begin_read().map_err(StorageError::from)?;
        let mut metadata = {
            let meta_table = read_txn
                .open_table(STORE_META_TABLE)
                .map_err(|e| StorageError::corrupted(format!("Cannot open metadata table: {e}")))?;
            let bytes = meta_table
                .get(STORE_META_KEY)
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::corrupted("Missing cache metadata"))?;
            serde_json::from_slice::<StoreMetadata>(bytes.value())
                .map_err(|e| StorageError::corrupted(format!("Invalid metadata format: {e}")))?
        };
        drop(read_txn);

        if metadata.schema_version != SCHEMA_VERSION {
            warn!(
                expected = SCHEMA_VERSION,
                found = metadata.schema_version,
                "Cache schema version mismatch"
            );
            return Err(StorageError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION,
                found: metadata.schema_version,
            }
            .into());
        }

        metadata.touch();

        let write_txn = db.begin_write().map_err(StorageError::from)?;
        {
            let mut meta_table = write_txn.open_table(STORE_META_TABLE)?;
            let bytes = serde_json::to_vec(&metadata).map_err(StorageError::from)?;
            meta_table.insert(STORE_META_KEY, bytes.as_slice())?;
        }
        write_txn.commit().map_err(StorageError::from)?;

        Ok(metadata)
    }

    /// Returns the cache-level metadata.
    #[inline]
    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    /// Returns the path to the cache database file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the cache, flushing any pending writes.
    ///
    /// redb flushes durably on drop; this consumes the store so it cannot
    /// be used afterwards.
    #[instrument(skip(self))]
    pub fn close(self) -> Result<()> {
        info!("Closing cache store");
        drop(self.db);
        Ok(())
    }

    // =========================================================================
    // Internal plumbing
    // =========================================================================

    /// Returns the write lock for one user's partition, creating it lazily.
    fn partition_lock(&self, user: &str) -> Result<Arc<Mutex<()>>> {
        {
            let map = self
                .partitions
                .read()
                .map_err(|_| StorageError::transaction("partition lock map poisoned"))?;
            if let Some(lock) = map.get(user) {
                return Ok(Arc::clone(lock));
            }
        }

        let mut map = self
            .partitions
            .write()
            .map_err(|_| StorageError::transaction("partition lock map poisoned"))?;
        Ok(Arc::clone(
            map.entry(user.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Acquires a guard serializing writers on one user's partition.
    fn lock_partition<'a>(&self, lock: &'a Mutex<()>) -> Result<MutexGuard<'a, ()>> {
        lock.lock()
            .map_err(|_| StorageError::transaction("partition lock poisoned").into())
    }

    /// Runs a closure against the user-data table in one write transaction.
    ///
    /// The transaction commits only when the closure succeeds; an error
    /// aborts it, leaving the cache untouched.
    fn with_write<R>(
        &self,
        f: impl FnOnce(&mut Table<'_, &'static str, &'static [u8]>) -> Result<R>,
    ) -> Result<R> {
        let write_txn = self.db.begin_write().map_err(StorageError::from)?;
        let result = {
            let mut table = write_txn.open_table(USER_DATA_TABLE)?;
            f(&mut table)
        };
        match result {
            Ok(value) => {
                write_txn.commit().map_err(StorageError::from)?;
                Ok(value)
            }
            Err(err) => {
                let _ = write_txn.abort();
                Err(err)
            }
        }
    }

    /// Reads and deserializes one key in a fresh read transaction.
    fn read_value<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(USER_DATA_TABLE)?;
        get_value(&table, key)
    }

    /// Validates the caller-supplied user id. Fails fast, mutating nothing.
    fn validate_user(user: &str) -> Result<()> {
        if user.is_empty() {
            return Err(ValidationError::required_field("user_id").into());
        }
        Ok(())
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Retrieves the user's profile.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Profile`] when no profile has been saved.
    #[instrument(skip(self))]
    pub fn get_profile(&self, user: &str) -> Result<Profile> {
        Self::validate_user(user)?;
        self.read_value(&profile_key(user))?
            .ok_or_else(|| NotFoundError::profile(user).into())
    }

    /// Saves (or replaces) the user's profile.
    #[instrument(skip(self, profile))]
    pub fn save_profile(&self, user: &str, profile: &Profile) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        self.with_write(|table| put_value(table, &profile_key(user), profile))
    }

    // =========================================================================
    // Companies
    // =========================================================================

    /// Lists the user's companies in insertion order.
    ///
    /// Returns an empty list when none have been saved; never fails on
    /// absence.
    #[instrument(skip(self))]
    pub fn list_companies(&self, user: &str) -> Result<Vec<Company>> {
        Self::validate_user(user)?;
        Ok(self
            .read_value(&companies_key(user))?
            .unwrap_or_default())
    }

    /// Retrieves one company by id.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Company`] when absent.
    #[instrument(skip(self))]
    pub fn get_company(&self, user: &str, id: i64) -> Result<Company> {
        self.list_companies(user)?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| NotFoundError::Company(id).into())
    }

    /// Inserts or updates a company, preserving list order.
    ///
    /// An existing entry with the same id is replaced in place; a new
    /// company is appended.
    #[instrument(skip(self, company), fields(company_id = company.id))]
    pub fn save_company(&self, user: &str, company: &Company) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        self.with_write(|table| {
            let key = companies_key(user);
            let mut companies: Vec<Company> = get_value(table, &key)?.unwrap_or_default();
            match companies.iter_mut().find(|c| c.id == company.id) {
                Some(existing) => *existing = company.clone(),
                None => companies.push(company.clone()),
            }
            put_value(table, &key, &companies)
        })
    }

    /// Deletes a company, cascading to its jobs and their matches.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Company`] when the company does not exist.
    /// No state is mutated in that case.
    #[instrument(skip(self))]
    pub fn delete_company(&self, user: &str, id: i64) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        let cascaded = self.with_write(|table| {
            let ckey = companies_key(user);
            let mut companies: Vec<Company> = get_value(table, &ckey)?.unwrap_or_default();
            let pos = companies
                .iter()
                .position(|c| c.id == id)
                .ok_or(NotFoundError::Company(id))?;
            companies.remove(pos);
            put_value(table, &ckey, &companies)?;

            let jkey = jobs_key(user, id);
            let jobs: Vec<Job> = get_value(table, &jkey)?.unwrap_or_default();
            table.remove(jkey.as_str())?;

            let job_ids: HashSet<i64> = jobs.iter().map(|j| j.id).collect();
            if !job_ids.is_empty() {
                let mkey = matches_key(user);
                let matches: Option<Vec<MatchResult>> = get_value(table, &mkey)?;
                if let Some(mut matches) = matches {
                    matches.retain(|m| !job_ids.contains(&m.job_id));
                    put_value(table, &mkey, &matches)?;
                }
            }
            Ok(jobs.len())
        })?;

        if cascaded > 0 {
            info!(company_id = id, jobs = cascaded, "Cascade-deleted jobs");
        }
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Lists jobs under one company, in insertion order.
    ///
    /// Returns an empty list for an unknown company or one with no jobs.
    #[instrument(skip(self))]
    pub fn list_jobs(&self, user: &str, company_id: i64) -> Result<Vec<Job>> {
        Self::validate_user(user)?;
        Ok(self
            .read_value(&jobs_key(user, company_id))?
            .unwrap_or_default())
    }

    /// Retrieves one job by id, scanning across the user's companies.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Job`] when no company's list contains it.
    #[instrument(skip(self))]
    pub fn get_job(&self, user: &str, job_id: i64) -> Result<Job> {
        for company in self.list_companies(user)? {
            if let Some(job) = self
                .list_jobs(user, company.id)?
                .into_iter()
                .find(|j| j.id == job_id)
            {
                return Ok(job);
            }
        }
        Err(NotFoundError::Job(job_id).into())
    }

    /// Inserts or updates a job within its company's list.
    ///
    /// An existing entry with the same id is replaced in place; a new job
    /// is appended. A job whose id currently lives under a different
    /// company is moved, so one id never resolves to two jobs.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Company`] when `job.company_id` does not
    /// reference a saved company.
    #[instrument(skip(self, job), fields(job_id = job.id, company_id = job.company_id))]
    pub fn save_job(&self, user: &str, job: &Job) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        self.with_write(|table| {
            let companies: Vec<Company> =
                get_value(table, &companies_key(user))?.unwrap_or_default();
            if !companies.iter().any(|c| c.id == job.company_id) {
                return Err(NotFoundError::Company(job.company_id).into());
            }

            // Evict the id from any other company's list first
            for company in companies.iter().filter(|c| c.id != job.company_id) {
                let key = jobs_key(user, company.id);
                let jobs: Option<Vec<Job>> = get_value(table, &key)?;
                if let Some(mut jobs) = jobs {
                    let before = jobs.len();
                    jobs.retain(|j| j.id != job.id);
                    if jobs.len() != before {
                        put_value(table, &key, &jobs)?;
                    }
                }
            }

            let key = jobs_key(user, job.company_id);
            let mut jobs: Vec<Job> = get_value(table, &key)?.unwrap_or_default();
            match jobs.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job.clone(),
                None => jobs.push(job.clone()),
            }
            put_value(table, &key, &jobs)
        })
    }

    /// Deletes a job, cascading to its match results.
    ///
    /// Locates the owning company by scanning, removes the job from that
    /// company's list, and drops every match referencing it.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Job`] when no company's list contains it.
    #[instrument(skip(self))]
    pub fn delete_job(&self, user: &str, job_id: i64) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        self.with_write(|table| {
            let companies: Vec<Company> =
                get_value(table, &companies_key(user))?.unwrap_or_default();

            let mut found = false;
            for company in &companies {
                let key = jobs_key(user, company.id);
                let jobs: Option<Vec<Job>> = get_value(table, &key)?;
                if let Some(mut jobs) = jobs {
                    let before = jobs.len();
                    jobs.retain(|j| j.id != job_id);
                    if jobs.len() != before {
                        put_value(table, &key, &jobs)?;
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                return Err(NotFoundError::Job(job_id).into());
            }

            let mkey = matches_key(user);
            let matches: Option<Vec<MatchResult>> = get_value(table, &mkey)?;
            if let Some(mut matches) = matches {
                matches.retain(|m| m.job_id != job_id);
                put_value(table, &mkey, &matches)?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Matches
    // =========================================================================

    /// Saves a match result at the front of the user's list.
    ///
    /// The list is kept newest-first; re-saving an existing id moves it to
    /// the front with the new payload.
    #[instrument(skip(self, result), fields(match_id = result.id, job_id = result.job_id))]
    pub fn save_match(&self, user: &str, result: &MatchResult) -> Result<()> {
        Self::validate_user(user)?;
        let lock = self.partition_lock(user)?;
        let _guard = self.lock_partition(&lock)?;

        self.with_write(|table| {
            let key = matches_key(user);
            let mut matches: Vec<MatchResult> = get_value(table, &key)?.unwrap_or_default();
            matches.retain(|m| m.id != result.id);
            matches.insert(0, result.clone());
            put_value(table, &key, &matches)
        })
    }

    /// Lists match results, newest first, up to `limit` entries.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::NoMatches`] when the user has no match
    /// results at all.
    #[instrument(skip(self))]
    pub fn list_matches(&self, user: &str, limit: Option<usize>) -> Result<Vec<MatchResult>> {
        Self::validate_user(user)?;
        let mut matches: Vec<MatchResult> = self
            .read_value(&matches_key(user))?
            .unwrap_or_default();
        if matches.is_empty() {
            return Err(NotFoundError::no_matches(user).into());
        }
        if let Some(limit) = limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    /// Retrieves one match result by id.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError::Match`] when absent.
    #[instrument(skip(self))]
    pub fn get_match(&self, user: &str, id: i64) -> Result<MatchResult> {
        Self::validate_user(user)?;
        self.read_value::<Vec<MatchResult>>(&matches_key(user))?
            .unwrap_or_default()
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| NotFoundError::Match(id).into())
    }

    // =========================================================================
    // Session metadata
    // =========================================================================

    /// Loads the user's session metadata, if any has been persisted.
    #[instrument(skip(self))]
    pub fn load_metadata(&self, user: &str) -> Result<Option<SessionMetadata>> {
        Self::validate_user(user)?;
        self.read_value(&metadata_key(user))
    }

    /// Persists the user's session metadata.
    #[instrument(skip(self, meta), fields(is_dirty = meta.is_dirty))]
    pub fn save_metadata(&self, user: &str, meta: &SessionMetadata) -> Result<()> {
        Self::validate_user(user)?;
        self.with_write(|table| put_value(table, &metadata_key(user), meta))
    }

    /// Returns true when the user's partition holds no data at all.
    ///
    /// Session metadata does not count as data; a partition with entities
    /// but no metadata row is what the dirty-on-restart fallback detects.
    #[instrument(skip(self))]
    pub fn partition_is_empty(&self, user: &str) -> Result<bool> {
        Self::validate_user(user)?;
        let read_txn = self.db.begin_read().map_err(StorageError::from)?;
        let table = read_txn.open_table(USER_DATA_TABLE)?;
        for key in [profile_key(user), companies_key(user), matches_key(user)] {
            if table.get(key.as_str()).map_err(StorageError::from)?.is_some() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Reads and deserializes one key from a table.
fn get_value<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> Result<Option<T>> {
    match table.get(key).map_err(StorageError::from)? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(StorageError::from)?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Serializes and writes one key into a table.
fn put_value<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(StorageError::from)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}
