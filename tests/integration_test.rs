// Integration tests for the WebDict session client
//
// These tests run the full stack (reqwest transport, SQLite store, refresh
// coordination) against a mock API server.

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use webdict_session::{
    error::SessionError,
    http_client::{ClientOptions, SessionClient},
    navigation::Navigator,
    session::{CredentialPair, CredentialStore, SessionState, SqliteCredentialStore},
    transport::{ApiRequest, ReqwestTransport},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

#[derive(Default)]
struct CountingNavigator {
    logins: AtomicUsize,
    errors: AtomicUsize,
}

impl Navigator for CountingNavigator {
    fn go_to_login(&self) {
        self.logins.fetch_add(1, Ordering::SeqCst);
    }

    fn go_to_error_surface(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

struct TestClient {
    client: SessionClient,
    store: Arc<SqliteCredentialStore>,
    navigator: Arc<CountingNavigator>,
}

fn create_client(server: &ServerGuard, db_path: &Path) -> TestClient {
    let store = Arc::new(SqliteCredentialStore::open(db_path).expect("Failed to open store"));
    let transport = Arc::new(
        ReqwestTransport::new(&server.url(), 4, 5, 10).expect("Failed to create transport"),
    );
    let navigator = Arc::new(CountingNavigator::default());

    let client = SessionClient::new(
        transport,
        store.clone(),
        navigator.clone(),
        ClientOptions::default(),
    );

    TestClient {
        client,
        store,
        navigator,
    }
}

fn seed_store(db_path: &Path, access_token: &str) {
    let store = SqliteCredentialStore::open(db_path).expect("Failed to open store");
    store
        .save(&CredentialPair::new(access_token, "Bearer").with_refresh_token("r-1"))
        .expect("Failed to seed store");
}

// ==================================================================================================
// Login
// ==================================================================================================

#[tokio::test]
async fn test_login_stores_credentials_and_cookie() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");

    let signin = server
        .mock("POST", "/v1/api/auth/signin")
        .match_header("authorization", Matcher::Missing)
        .match_body(Matcher::Json(json!({
            "email": "admin@example.com",
            "password": "secret"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("set-cookie", "refreshToken=r-1; Path=/; HttpOnly")
        .with_body(r#"{"accessToken":"A1","type":"Bearer"}"#)
        .create_async()
        .await;

    let t = create_client(&server, &db_path);
    t.client.login("admin@example.com", "secret").await.unwrap();

    signin.assert_async().await;
    assert!(t.client.is_logged_in());

    let stored = t.store.load().unwrap();
    assert_eq!(stored.access_token, "A1");
    assert_eq!(stored.token_type, "Bearer");
    assert_eq!(stored.refresh_token.as_deref(), Some("r-1"));
}

#[tokio::test]
async fn test_login_rejected() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();

    server
        .mock("POST", "/v1/api/auth/signin")
        .with_status(401)
        .create_async()
        .await;

    let t = create_client(&server, &dir.path().join("session.sqlite3"));
    let err = t.client.login("admin@example.com", "wrong").await.unwrap_err();

    assert!(err.is_session_expired());
    assert_eq!(t.client.current_session_state(), SessionState::LoggedOut);
}

// ==================================================================================================
// Refresh and retry
// ==================================================================================================

#[tokio::test]
async fn test_concurrent_401s_refresh_once() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");
    seed_store(&db_path, "A1");

    let stale = server
        .mock("GET", Matcher::Regex(r"^/v1/api/(tags|langs)$".to_string()))
        .match_header("authorization", "Bearer A1")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let fresh = server
        .mock("GET", Matcher::Regex(r"^/v1/api/(tags|langs)$".to_string()))
        .match_header("authorization", "Bearer A2")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("[]")
        .expect(2)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/v1/api/auth/refresh")
        .match_header("cookie", Matcher::Regex("refreshToken=r-1".to_string()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken":"A2","type":"Bearer"}"#)
        .expect(1)
        .create_async()
        .await;

    let t = create_client(&server, &db_path);
    let (r1, r2) = tokio::join!(
        t.client.attach_and_send(ApiRequest::get("/v1/api/tags")),
        t.client.attach_and_send(ApiRequest::get("/v1/api/langs")),
    );

    assert_eq!(r1.unwrap().text(), "[]");
    assert_eq!(r2.unwrap().text(), "[]");

    stale.assert_async().await;
    fresh.assert_async().await;
    refresh.assert_async().await;

    let stored = t.store.load().unwrap();
    assert_eq!(stored.access_token, "A2");
    assert_eq!(stored.refresh_token.as_deref(), Some("r-1"));
    assert!(t.client.is_logged_in());
    assert_eq!(t.navigator.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refresh_rejected_ends_session() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");
    seed_store(&db_path, "A1");

    server
        .mock("GET", Matcher::Regex(r"^/v1/api/(tags|langs)$".to_string()))
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/v1/api/auth/refresh")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;

    let t = create_client(&server, &db_path);
    let (r1, r2) = tokio::join!(
        t.client.attach_and_send(ApiRequest::get("/v1/api/tags")),
        t.client.attach_and_send(ApiRequest::get("/v1/api/langs")),
    );

    assert!(r1.unwrap_err().is_session_expired());
    assert!(r2.unwrap_err().is_session_expired());
    refresh.assert_async().await;

    assert_eq!(t.client.current_session_state(), SessionState::LoggedOut);
    assert!(t.store.load().is_none());
    assert_eq!(t.navigator.logins.load(Ordering::SeqCst), 1);

    // Cleared on disk too
    let reopened = SqliteCredentialStore::open(&db_path).unwrap();
    assert!(reopened.load().is_none());
}

// ==================================================================================================
// Passthrough
// ==================================================================================================

#[tokio::test]
async fn test_validation_error_passes_through() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");
    seed_store(&db_path, "A1");

    server
        .mock("POST", "/v1/api/tags")
        .match_header("authorization", "Bearer A1")
        .with_status(400)
        .with_body(r#"{"name":"must not be blank"}"#)
        .create_async()
        .await;

    let refresh = server
        .mock("POST", "/v1/api/auth/refresh")
        .expect(0)
        .create_async()
        .await;

    let t = create_client(&server, &db_path);
    let request = ApiRequest::post("/v1/api/tags")
        .json(&json!({"name": ""}))
        .unwrap();
    let err = t.client.attach_and_send(request).await.unwrap_err();

    match err {
        SessionError::Validation { status, body } => {
            assert_eq!(status, 400);
            assert_eq!(body, r#"{"name":"must not be blank"}"#);
        }
        other => panic!("Expected validation error, got {:?}", other),
    }
    refresh.assert_async().await;
    assert!(t.client.is_logged_in());
}

#[tokio::test]
async fn test_server_error_reaches_error_surface() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");
    seed_store(&db_path, "A1");

    server
        .mock("GET", "/v1/api/tags")
        .with_status(503)
        .create_async()
        .await;

    let t = create_client(&server, &db_path);
    let err = t
        .client
        .attach_and_send(ApiRequest::get("/v1/api/tags"))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Unexpected { status: 503, .. }));
    assert!(err.is_retryable());
    assert_eq!(t.navigator.errors.load(Ordering::SeqCst), 1);
    assert!(t.client.is_logged_in());
}

// ==================================================================================================
// Persistence
// ==================================================================================================

#[tokio::test]
async fn test_session_survives_restart() {
    let mut server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");

    server
        .mock("POST", "/v1/api/auth/signin")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"accessToken":"A1","type":"Bearer"}"#)
        .create_async()
        .await;

    let tags = server
        .mock("GET", "/v1/api/tags")
        .match_header("authorization", "Bearer A1")
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    {
        let t = create_client(&server, &db_path);
        t.client.login("admin@example.com", "secret").await.unwrap();
    }

    let t = create_client(&server, &db_path);
    assert!(matches!(
        t.client.current_session_state(),
        SessionState::LoggedIn(_)
    ));
    t.client
        .attach_and_send(ApiRequest::get("/v1/api/tags"))
        .await
        .unwrap();
    tags.assert_async().await;
}

#[tokio::test]
async fn test_logout_clears_persisted_session() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("session.sqlite3");
    seed_store(&db_path, "A1");
    let server = Server::new_async().await;

    let t = create_client(&server, &db_path);
    assert!(t.client.is_logged_in());

    t.client.logout();

    let t = create_client(&server, &db_path);
    assert_eq!(t.client.current_session_state(), SessionState::LoggedOut);
}
