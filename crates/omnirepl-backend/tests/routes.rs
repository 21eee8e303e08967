use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use omnirepl_backend::{
    build_router, executor_for, Backend, BackendError, RegistryClient, Result,
};
use omnirepl_http::ServerConfig;
use omnirepl_types::{EnvironmentState, Language, Session};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

/// Registry stand-in holding sessions in memory.
#[derive(Clone, Default)]
struct MemoryRegistry {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
}

impl MemoryRegistry {
    fn add(&self, id: &str, language: &str) {
        self.sessions.lock().unwrap().insert(
            id.to_string(),
            Session::new(id, format!("Session {}", id), Language::new(language)),
        );
    }

    fn session(&self, id: &str) -> Session {
        self.sessions.lock().unwrap()[id].clone()
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn fetch_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn fetch_environment(&self, session_id: &str) -> Result<Option<EnvironmentState>> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|session| session.environment.clone())
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))
    }

    async fn store_environment(&self, session_id: &str, language: &Language, data: String) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;
        session.environment = Some(EnvironmentState {
            language: language.clone(),
            serialized_data: Some(data),
            last_updated: Utc::now(),
        });
        Ok(())
    }

    async fn clear_environment(&self, session_id: &str) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        Ok(match sessions.get_mut(session_id) {
            Some(session) => {
                session.environment = None;
                true
            }
            None => false,
        })
    }

    async fn record_activity(&self, session_id: &str, language: &Language) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::SessionNotFound(session_id.to_string()))?;
        if session.language != *language {
            return Err(BackendError::LanguageMismatch {
                session_id: session_id.to_string(),
                stored: session.language.clone(),
                requested: language.clone(),
            });
        }
        session.execution_count += 1;
        session.touch();
        Ok(())
    }
}

fn app(language: &str, registry: &MemoryRegistry, root: &Path) -> Router {
    let executor = executor_for(&Language::new(language), root).unwrap();
    let backend = Backend::new(executor, Arc::new(registry.clone()));
    build_router(backend, &ServerConfig::new().with_logging(false))
}

async fn post(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let mut request = Request::builder().method("POST").uri(uri);
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
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn execute(app: &Router, session_id: &str, code: &str) -> (StatusCode, Value) {
    let (status, body) = post(app, &format!("/execute/{}", session_id), Some(json!({ "code": code }))).await;
    (status, serde_json::from_str(&body).unwrap())
}

/// The JSON payload of every SSE event in `body`.
async fn stream(app: &Router, session_id: &str, code: &str) -> Vec<Value> {
    let (status, body) = post(
        app,
        &format!("/execute-stream/{}", session_id),
        Some(json!({ "code": code })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

fn completes(events: &[Value]) -> Vec<i64> {
    events
        .iter()
        .filter(|event| event["type"] == "complete")
        .map(|event| event["returnCode"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = app("kite", &MemoryRegistry::default(), dir.path());
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["language"], "kite");
    assert_eq!(body["stateless"], true);
}

#[tokio::test]
async fn test_variables_persist_across_requests() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    let (status, body) = execute(&app, "s1", "set v = 42").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "");
    assert!(body["error"].is_null());

    let (_, body) = execute(&app, "s1", "print v").await;
    assert_eq!(body["output"], "42\n");
    assert!(body["error"].is_null());

    let (_, body) = execute(&app, "s1", "v * 2").await;
    assert_eq!(body["output"], "84\n");

    let session = registry.session("s1");
    assert_eq!(session.execution_count, 3);
    assert!(session.environment.is_some());
}

#[tokio::test]
async fn test_guest_error_is_a_normal_response() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    let (status, body) = execute(&app, "s1", "set before = 1\nprint 'partial'\n1/0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "partial\n");
    assert_eq!(body["error"], "ZeroDivisionError: division by zero");
    assert_eq!(body["error_type"], "execution_error");
    assert_eq!(body["error_kind"], "ZeroDivisionError");

    // Bindings made before the failure are kept.
    let (_, body) = execute(&app, "s1", "before").await;
    assert_eq!(body["output"], "1\n");
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("a", "kite");
    registry.add("b", "kite");
    let app = app("kite", &registry, dir.path());

    execute(&app, "a", "set v = 'from a'").await;
    execute(&app, "b", "set v = 'from b'").await;

    let (_, body) = execute(&app, "a", "print v").await;
    assert_eq!(body["output"], "from a\n");
    let (_, body) = execute(&app, "b", "print v").await;
    assert_eq!(body["output"], "from b\n");
}

#[tokio::test]
async fn test_reset_forgets_variables() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    execute(&app, "s1", "set v = 42").await;
    let (status, body) = post(&app, "/reset/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["message"], "Session reset successfully");
    assert!(registry.session("s1").environment.is_none());

    let (_, body) = execute(&app, "s1", "print v").await;
    assert_eq!(body["error_kind"], "NameError");
    assert_eq!(body["error"], "NameError: name 'v' is not defined");
}

#[tokio::test]
async fn test_blank_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    for session_id in ["s1", "missing"] {
        let (status, body) = execute(&app, session_id, "   \n").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["details"], "Code cannot be empty");
    }

    let (status, _) = post(&app, "/execute-stream/s1", Some(json!({ "code": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(registry.session("s1").execution_count, 0);
}

#[tokio::test]
async fn test_language_mismatch_and_unknown_session() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("py", "python");
    let app = app("kite", &registry, dir.path());

    let (status, body) = execute(&app, "py", "print 1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "session_language_mismatch");
    assert_eq!(registry.session("py").language, "python");
    assert_eq!(registry.session("py").execution_count, 0);

    let (status, body) = execute(&app, "nobody", "print 1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_kite_stream() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    let events = stream(&app, "s1", "set v = 7\nprint v").await;
    let output: String = events
        .iter()
        .filter(|event| event["type"] == "output")
        .filter_map(|event| event["content"].as_str())
        .collect();
    assert_eq!(output, "7\n");
    assert_eq!(completes(&events), vec![0]);
    assert_eq!(events.last().unwrap()["type"], "complete");

    // State saved by the stream is visible to the next request.
    let (_, body) = execute(&app, "s1", "print v + 1").await;
    assert_eq!(body["output"], "8\n");
}

#[tokio::test]
async fn test_stream_failures_still_complete_once() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("s1", "kite");
    let app = app("kite", &registry, dir.path());

    let events = stream(&app, "s1", "1/0").await;
    assert!(events
        .iter()
        .any(|event| event["type"] == "error"
            && event["content"] == "ZeroDivisionError: division by zero"));
    assert_eq!(completes(&events), vec![1]);

    let events = stream(&app, "missing", "print 1").await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(completes(&events), vec![1]);
}

#[tokio::test]
async fn test_bash_stream_emits_lines() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("sh", "bash");
    let app = app("bash", &registry, dir.path());

    let events = stream(&app, "sh", "echo one; echo two; echo three").await;
    let outputs: Vec<&str> = events
        .iter()
        .filter(|event| event["type"] == "output")
        .filter_map(|event| event["content"].as_str())
        .collect();
    assert!(outputs.len() >= 3);
    assert_eq!(outputs.concat(), "one\ntwo\nthree\n");
    assert_eq!(completes(&events), vec![0]);
    assert_eq!(registry.session("sh").execution_count, 1);
}

#[tokio::test]
async fn test_bash_failure_reports_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::default();
    registry.add("sh", "bash");
    let app = app("bash", &registry, dir.path());

    let (status, body) = execute(&app, "sh", "echo out; echo broken >&2; exit 4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "out\n");
    assert_eq!(body["error"], "broken\n");
    assert_eq!(body["error_kind"], "ExitStatus");

    let events = stream(&app, "sh", "exit 2").await;
    assert!(events
        .iter()
        .any(|event| event["content"] == "Command exited with code 2"));
    assert_eq!(completes(&events), vec![1]);
}
