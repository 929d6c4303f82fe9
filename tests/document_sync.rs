//! Integration tests for the dirty-flag lifecycle, sync snapshots, and
//! corruption handling, driven through a mock remote backend.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use huntstore::{
    codec, CacheStore, Company, Job, MatchResult, ObjectHandle, Profile, RemoteBackend,
    RemoteError, Result, StoreSession, UserDocument,
};
use tempfile::tempdir;

/// In-memory remote backend shared between the test and the session.
#[derive(Clone, Default)]
struct MockRemote {
    body: Arc<Mutex<Option<Vec<u8>>>>,
    uploads: Arc<AtomicU64>,
    fail_uploads: Arc<AtomicBool>,
}

impl MockRemote {
    fn with_body(bytes: Vec<u8>) -> Self {
        let remote = Self::default();
        *remote.body.lock().unwrap() = Some(bytes);
        remote
    }

    fn upload_count(&self) -> u64 {
        self.uploads.load(Ordering::SeqCst)
    }

    fn last_body(&self) -> Option<Vec<u8>> {
        self.body.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteBackend for MockRemote {
    async fn locate_or_create(&self, user: &str) -> Result<ObjectHandle> {
        Ok(ObjectHandle {
            user_id: user.to_string(),
            location: format!("mock://{user}"),
        })
    }

    async fn download(&self, _handle: &ObjectHandle) -> Result<Vec<u8>> {
        match self.body.lock().unwrap().clone() {
            Some(bytes) => Ok(bytes),
            None => Err(RemoteError::unavailable("no document").into()),
        }
    }

    async fn upload(&self, _handle: &ObjectHandle, bytes: Vec<u8>) -> Result<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable("injected failure").into());
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        *self.body.lock().unwrap() = Some(bytes);
        Ok(())
    }
}

async fn session_with(
    remote: MockRemote,
) -> (tempfile::TempDir, Arc<StoreSession>) {
    let dir = tempdir().unwrap();
    let cache = Arc::new(CacheStore::open(dir.path()).unwrap());
    let session = StoreSession::initialize("alice", cache, Box::new(remote))
        .await
        .unwrap();
    (dir, session)
}

fn sample_profile() -> Profile {
    Profile {
        id: 1,
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        title: "Engineer".to_string(),
        location: "London".to_string(),
        skills: vec!["rust".to_string()],
        summary: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dirty_flag_lifecycle() {
    let remote = MockRemote::default();
    let (_dir, session) = session_with(remote.clone()).await;

    // Fresh session is clean
    assert!(!session.is_dirty());

    session.save_profile(&sample_profile()).unwrap();
    assert!(session.is_dirty());

    let before = Utc::now();
    session.sync().await.unwrap();

    assert!(!session.is_dirty());
    assert!(session.last_sync_time().unwrap() >= before);
    assert_eq!(remote.upload_count(), 1);

    // Clean sync performs zero uploads
    session.sync().await.unwrap();
    assert_eq!(remote.upload_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_snapshot_matches_cache_contents() {
    let remote = MockRemote::default();
    let (_dir, session) = session_with(remote.clone()).await;

    session.save_profile(&sample_profile()).unwrap();
    session.save_company(&Company::new(1, "Acme")).unwrap();
    session.save_company(&Company::new(2, "Initech")).unwrap();
    session.save_job(&Job::new(10, 1, "Backend")).unwrap();
    session.save_job(&Job::new(11, 1, "SRE")).unwrap();
    session.save_job(&Job::new(12, 2, "Platform")).unwrap();
    session.save_match(&MatchResult::new(100, 10, 0.9)).unwrap();
    session.save_match(&MatchResult::new(101, 12, 0.7)).unwrap();

    session.sync().await.unwrap();

    let doc = codec::decode(&remote.last_body().unwrap()).unwrap();
    assert_eq!(doc.data.profile.as_ref().unwrap().first_name, "Ada");

    let company_ids: Vec<i64> = doc.data.companies.iter().map(|c| c.id).collect();
    assert_eq!(company_ids, vec![1, 2]);

    // Jobs concatenated in company order
    let job_ids: Vec<i64> = doc.data.jobs.iter().map(|j| j.id).collect();
    assert_eq!(job_ids, vec![10, 11, 12]);

    // Matches newest first
    let match_ids: Vec<i64> = doc.data.matches.iter().map(|m| m.id).collect();
    assert_eq!(match_ids, vec![101, 100]);

    assert_eq!(doc.checksum.len(), 64);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_upload_keeps_dirty_then_recovers() {
    let remote = MockRemote::default();
    remote.fail_uploads.store(true, Ordering::SeqCst);
    let (_dir, session) = session_with(remote.clone()).await;

    session.save_company(&Company::new(1, "Acme")).unwrap();

    let err = session.sync().await.unwrap_err();
    assert!(err.is_retryable());
    assert!(session.is_dirty());
    assert!(session.last_sync_time().is_none());

    remote.fail_uploads.store(false, Ordering::SeqCst);
    session.sync().await.unwrap();
    assert!(!session.is_dirty());
    assert_eq!(remote.upload_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hydration_roundtrip_through_remote() {
    // First life: build state and upload it
    let remote = MockRemote::default();
    {
        let (_dir, session) = session_with(remote.clone()).await;
        session.save_profile(&sample_profile()).unwrap();
        session.save_company(&Company::new(1, "Acme")).unwrap();
        session.save_job(&Job::new(10, 1, "Backend")).unwrap();
        session.save_match(&MatchResult::new(100, 10, 0.9)).unwrap();
        session.save_match(&MatchResult::new(101, 10, 0.8)).unwrap();
        session.sync().await.unwrap();
    }

    // Second life: a fresh cache hydrates from the uploaded document
    let (_dir, session) = session_with(remote.clone()).await;
    assert!(!session.is_dirty());
    assert_eq!(session.get_profile().unwrap().first_name, "Ada");
    assert_eq!(session.get_company(1).unwrap().name, "Acme");
    assert_eq!(session.get_job(10).unwrap().title, "Backend");

    let ids: Vec<i64> = session
        .list_matches(None)
        .unwrap()
        .iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![101, 100], "newest-first order survives the roundtrip");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_corrupted_remote_document_rejected_and_never_overwritten() {
    // Encode a real document, then flip one byte inside the data subtree
    let mut doc = UserDocument::empty();
    doc.data.companies = vec![Company::new(1, "Acme")];
    let bytes = codec::encode(&mut doc).unwrap();

    let mut json = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut json)
        .unwrap();
    let pos = String::from_utf8(json.clone()).unwrap().find("Acme").unwrap();
    json[pos] = b'Z';
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).unwrap();
    let tampered = encoder.finish().unwrap();

    assert!(codec::decode(&tampered).unwrap_err().is_corrupt());

    // A session hydrating from the tampered document stays cache-only and
    // refuses to overwrite the remote copy
    let remote = MockRemote::with_body(tampered);
    let (_dir, session) = session_with(remote.clone()).await;

    assert!(session.list_companies().unwrap().is_empty());
    session.save_company(&Company::new(2, "Local")).unwrap();

    let err = session.sync().await.unwrap_err();
    assert!(err.is_corrupt());
    assert_eq!(remote.upload_count(), 0);
    assert!(session.is_dirty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writes_during_upload_stay_dirty() {
    // Remote whose upload blocks until the test releases it, so a write
    // can land mid-flight.
    #[derive(Clone)]
    struct SlowRemote {
        inner: MockRemote,
        gate: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl RemoteBackend for SlowRemote {
        async fn locate_or_create(&self, user: &str) -> Result<ObjectHandle> {
            self.inner.locate_or_create(user).await
        }
        async fn download(&self, handle: &ObjectHandle) -> Result<Vec<u8>> {
            self.inner.download(handle).await
        }
        async fn upload(&self, handle: &ObjectHandle, bytes: Vec<u8>) -> Result<()> {
            let _permit = self.gate.acquire().await.unwrap();
            self.inner.upload(handle, bytes).await
        }
    }

    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let remote = SlowRemote {
        inner: MockRemote::default(),
        gate: Arc::clone(&gate),
    };
    let inner = remote.inner.clone();

    let dir = tempdir().unwrap();
    let cache = Arc::new(CacheStore::open(dir.path()).unwrap());
    let session = StoreSession::initialize("alice", cache, Box::new(remote))
        .await
        .unwrap();

    session.save_company(&Company::new(1, "Acme")).unwrap();

    let syncing = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.sync().await })
    };

    // Let the sync assemble its snapshot and block in upload, then write
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    session.save_company(&Company::new(2, "Initech")).unwrap();

    gate.add_permits(1);
    syncing.await.unwrap().unwrap();

    // The mid-flight write is not in the uploaded snapshot and the session
    // remains dirty for the next cycle
    let doc = codec::decode(&inner.last_body().unwrap()).unwrap();
    assert_eq!(doc.data.companies.len(), 1);
    assert!(session.is_dirty());

    session.sync().await.unwrap();
    let doc = codec::decode(&inner.last_body().unwrap()).unwrap();
    assert_eq!(doc.data.companies.len(), 2);
    assert!(!session.is_dirty());
}
