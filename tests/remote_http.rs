//! Integration tests for the HTTP object-store backend against an in-process
//! axum mock server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use huntstore::{
    codec, Company, Config, HttpBackend, RemoteBackend, RemoteCredential, RemoteError,
    SessionProvider, StoreError,
};
use tempfile::tempdir;

const GOOD_TOKEN: &str = "good-token";

/// In-memory object store exposed over HTTP.
#[derive(Clone, Default)]
struct ObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    puts: Arc<AtomicU64>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(&format!("Bearer {GOOD_TOKEN}"))
}

async fn get_document(
    State(store): State<ObjectStore>,
    Path(user): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Vec<u8>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Vec::new());
    }
    match store.objects.lock().unwrap().get(&user) {
        Some(bytes) => (StatusCode::OK, bytes.clone()),
        None => (StatusCode::NOT_FOUND, Vec::new()),
    }
}

async fn put_document(
    State(store): State<ObjectStore>,
    Path(user): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    store.puts.fetch_add(1, Ordering::SeqCst);
    store.objects.lock().unwrap().insert(user, body.to_vec());
    StatusCode::NO_CONTENT
}

/// Starts the mock server, returning its base URL and the backing store.
async fn spawn_server() -> (String, ObjectStore) {
    let store = ObjectStore::default();
    let app = Router::new()
        .route("/users/{user}/document", get(get_document).put(put_document))
        .with_state(store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), store)
}

fn backend(base_url: &str, token: &str) -> HttpBackend {
    HttpBackend::new(
        reqwest::Client::new(),
        base_url,
        RemoteCredential::new(token),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_locate_or_create_seeds_empty_document() {
    let (base_url, store) = spawn_server().await;
    let backend = backend(&base_url, GOOD_TOKEN);

    let handle = backend.locate_or_create("alice").await.unwrap();
    assert_eq!(handle.user_id, "alice");
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);

    // The seeded object decodes to an empty document
    let bytes = backend.download(&handle).await.unwrap();
    let doc = codec::decode(&bytes).unwrap();
    assert!(doc.data.companies.is_empty());
    assert!(doc.data.profile.is_none());

    // A second locate finds the existing object without re-creating it
    backend.locate_or_create("alice").await.unwrap();
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_download_roundtrip() {
    let (base_url, _store) = spawn_server().await;
    let backend = backend(&base_url, GOOD_TOKEN);

    let handle = backend.locate_or_create("alice").await.unwrap();

    let mut doc = huntstore::UserDocument::empty();
    doc.data.companies = vec![Company::new(1, "Acme")];
    let bytes = codec::encode(&mut doc).unwrap();
    backend.upload(&handle, bytes).await.unwrap();

    let downloaded = backend.download(&handle).await.unwrap();
    assert_eq!(codec::decode(&downloaded).unwrap(), doc);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bad_credential_maps_to_unauthorized() {
    let (base_url, _store) = spawn_server().await;
    let backend = backend(&base_url, "stolen-token");

    let err = backend.locate_or_create("alice").await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::Remote(RemoteError::Unauthorized)
    ));
    assert!(!err.is_retryable());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_server_maps_to_unavailable() {
    // Nothing listens on this port
    let backend = backend("http://127.0.0.1:9", GOOD_TOKEN);

    let err = backend.locate_or_create("alice").await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(
        err,
        StoreError::Remote(RemoteError::Unavailable { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_provider_end_to_end_over_http() {
    let (base_url, store) = spawn_server().await;

    let dir = tempdir().unwrap();
    let config = Config::remote(dir.path(), &base_url);
    let provider = SessionProvider::new(config).unwrap();

    let session = provider
        .get("alice", Some(RemoteCredential::new(GOOD_TOKEN)))
        .await
        .unwrap();

    session.save_company(&Company::new(1, "Acme")).unwrap();
    session.sync().await.unwrap();

    let uploaded = store
        .objects
        .lock()
        .unwrap()
        .get("alice")
        .cloned()
        .unwrap();
    let doc = codec::decode(&uploaded).unwrap();
    assert_eq!(doc.data.companies.len(), 1);
    assert_eq!(doc.data.companies[0].name, "Acme");

    provider.close_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fresh_cache_hydrates_over_http() {
    let (base_url, _store) = spawn_server().await;

    // First deployment uploads state
    {
        let dir = tempdir().unwrap();
        let provider = SessionProvider::new(Config::remote(dir.path(), &base_url)).unwrap();
        let session = provider
            .get("alice", Some(RemoteCredential::new(GOOD_TOKEN)))
            .await
            .unwrap();
        session.save_company(&Company::new(1, "Acme")).unwrap();
        session.sync().await.unwrap();
        provider.close_all().await;
    }

    // Second deployment with an empty cache pulls it back down
    let dir = tempdir().unwrap();
    let provider = SessionProvider::new(Config::remote(dir.path(), &base_url)).unwrap();
    let session = provider
        .get("alice", Some(RemoteCredential::new(GOOD_TOKEN)))
        .await
        .unwrap();

    assert_eq!(session.get_company(1).unwrap().name, "Acme");
    assert!(!session.is_dirty());

    provider.close_all().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handle_is_scoped_to_one_user() {
    let (base_url, _store) = spawn_server().await;
    let backend = backend(&base_url, GOOD_TOKEN);

    let alice = backend.locate_or_create("alice").await.unwrap();
    let bob = backend.locate_or_create("bob").await.unwrap();
    assert_ne!(alice, bob);
    assert!(alice.location.contains("/users/alice/"));

    // Writes through one handle never touch the other
    let mut doc = huntstore::UserDocument::empty();
    doc.data.companies = vec![Company::new(1, "AliceCo")];
    backend
        .upload(&alice, codec::encode(&mut doc).unwrap())
        .await
        .unwrap();

    let bob_doc = codec::decode(&backend.download(&bob).await.unwrap()).unwrap();
    assert!(bob_doc.data.companies.is_empty());
}
