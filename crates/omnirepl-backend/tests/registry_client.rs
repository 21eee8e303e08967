use omnirepl_backend::{BackendError, HttpRegistryClient, RegistryClient};
use omnirepl_http::ServerConfig;
use omnirepl_registry::{build_router, BackendDirectory, SessionStore};
use omnirepl_types::Language;

/// Serve a fresh in-memory registry on an ephemeral port.
async fn registry() -> HttpRegistryClient {
    let store = SessionStore::in_memory().await.unwrap();
    let app = build_router(store, BackendDirectory::new(), &ServerConfig::new().with_logging(false));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    HttpRegistryClient::new(format!("http://{}", addr))
}

#[tokio::test]
async fn test_activity_against_live_registry() {
    let client = registry().await;
    let kite = Language::new("kite");

    assert!(client.fetch_session("s1").await.unwrap().is_none());

    client.record_activity("s1", &kite).await.unwrap();
    let session = client.fetch_session("s1").await.unwrap().unwrap();
    assert_eq!(session.language, "kite");
    assert_eq!(session.execution_count, 0);

    client.record_activity("s1", &kite).await.unwrap();
    let session = client.fetch_session("s1").await.unwrap().unwrap();
    assert_eq!(session.execution_count, 1);

    let err = client.record_activity("s1", &Language::new("bash")).await.unwrap_err();
    match err {
        BackendError::LanguageMismatch { stored, requested, .. } => {
            assert_eq!(stored, "kite");
            assert_eq!(requested, "bash");
        }
        other => panic!("expected a language mismatch, got {:?}", other),
    }
}

#[tokio::test]
async fn test_environment_against_live_registry() {
    let client = registry().await;
    let kite = Language::new("kite");
    client.record_activity("s1", &kite).await.unwrap();

    assert!(client.fetch_environment("s1").await.unwrap().is_none());

    client.store_environment("s1", &kite, "e30=".to_string()).await.unwrap();
    let state = client.fetch_environment("s1").await.unwrap().unwrap();
    assert_eq!(state.language, "kite");
    assert_eq!(state.serialized_data.as_deref(), Some("e30="));

    assert!(client.clear_environment("s1").await.unwrap());
    assert!(client.fetch_environment("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_session_against_live_registry() {
    let client = registry().await;
    let kite = Language::new("kite");

    assert!(matches!(
        client.fetch_environment("missing").await,
        Err(BackendError::SessionNotFound(_))
    ));
    assert!(matches!(
        client.store_environment("missing", &kite, "e30=".to_string()).await,
        Err(BackendError::SessionNotFound(_))
    ));
    assert!(!client.clear_environment("missing").await.unwrap());
}
