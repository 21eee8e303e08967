use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use omnirepl_http::ServerConfig;
use omnirepl_registry::{build_router, BackendDirectory, SessionStore};
use omnirepl_types::{Language, Session};
use serde_json::{json, Value};
use tower::ServiceExt;

async fn app(directory: BackendDirectory) -> Router {
    let store = SessionStore::in_memory().await.unwrap();
    build_router(store, directory, &ServerConfig::new().with_logging(false))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let app = app(BackendDirectory::new()).await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = app(BackendDirectory::new()).await;

    let (status, created) = send(&app, "POST", "/sessions", Some(json!({"language": "kite"}))).await;
    assert_eq!(status, StatusCode::OK);
    let session: Session = serde_json::from_value(created).unwrap();
    assert_eq!(session.name, "Session 1");
    assert_eq!(session.language, "kite");
    let base = format!("/sessions/{}", session.id);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("{}/rename", base),
        Some(json!({"name": "scratch"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["new_name"], "scratch");

    let (status, body) = send(
        &app,
        "POST",
        &format!("{}/history", base),
        Some(json!({"entry": {"id": "e1", "type": "input", "content": "print 1", "timestamp": "2024-01-01T00:00:00Z"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry_count"], 1);

    let (status, body) = send(
        &app,
        "PUT",
        &format!("{}/history/e1", base),
        Some(json!({"content": "print 2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry_id"], "e1");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("{}/history/e9", base),
        Some(json!({"content": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"], "History entry not found");

    let (_, history) = send(&app, "GET", &format!("{}/history", base), None).await;
    assert_eq!(history["count"], 1);
    assert_eq!(history["history"][0]["content"], "print 2");
    assert_eq!(history["history"][0]["timestamp"], "2024-01-01T00:00:00Z");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("{}/environment", base),
        Some(json!({"language": "kite", "serialized_data": "e30="})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Environment state updated");

    let (_, env) = send(&app, "GET", &format!("{}/environment", base), None).await;
    assert_eq!(env["environment"]["serialized_data"], "e30=");

    let (status, _) = send(&app, "DELETE", &format!("{}/environment", base), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, env) = send(&app, "GET", &format!("{}/environment", base), None).await;
    assert!(env["environment"].is_null());
    assert_eq!(env["message"], "No environment state stored");

    let (status, body) = send(&app, "DELETE", &base, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["cleanup_successful"].is_null());

    let (status, body) = send(&app, "GET", &base, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_activity_auto_create_and_language_conflict() {
    let app = app(BackendDirectory::new()).await;

    let (status, _) = send(&app, "PUT", "/sessions/fresh/activity?language=kite", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, session) = send(&app, "GET", "/sessions/fresh", None).await;
    assert_eq!(session["execution_count"], 0);
    assert_eq!(session["language"], "kite");

    let (status, body) = send(&app, "PUT", "/sessions/fresh/activity?language=bash", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "session_language_mismatch");

    let (_, listing) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(listing["total"], 1);

    let (_, admin) = send(&app, "GET", "/admin/sessions", None).await;
    assert_eq!(admin["summary"]["by_language"]["kite"], 1);
    assert_eq!(admin["summary"]["active_sessions"], 0);
}

#[tokio::test]
async fn test_blank_language_is_rejected() {
    let app = app(BackendDirectory::new()).await;

    for language in ["", "   "] {
        let (status, body) = send(&app, "POST", "/sessions", Some(json!({"language": language}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    let (status, body) = send(&app, "PUT", "/sessions/blank/activity?language=", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    let (status, _) = send(&app, "GET", "/sessions/blank", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listing) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(listing["total"], 0);
}

#[tokio::test]
async fn test_gateway_routes_by_session_language() {
    // A stand-in backend that echoes what it received.
    let backend = Router::new().route(
        "/execute/{session_id}",
        post(
            |axum::extract::Path(session_id): axum::extract::Path<String>, Json(body): Json<Value>| async move {
                Json(json!({"output": format!("{}:{}", session_id, body["code"].as_str().unwrap_or("")), "error": null}))
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, backend).await.unwrap();
    });

    let directory = BackendDirectory::new().with_backend(Language::new("kite"), format!("http://{}", addr));
    let app = app(directory).await;

    let (_, created) = send(&app, "POST", "/sessions", Some(json!({"language": "kite"}))).await;
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/gateway/execute/{}", id),
        Some(json!({"code": "print 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], format!("{}:print 1", id));

    let (status, _) = send(&app, "POST", "/gateway/execute/unknown", Some(json!({"code": "1"}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, created) = send(&app, "POST", "/sessions", Some(json!({"language": "cobol"}))).await;
    let id = created["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/gateway/execute/{}", id),
        Some(json!({"code": "1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}
