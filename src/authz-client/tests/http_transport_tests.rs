//! HTTP transport tests against an in-process stand-in service
//!
//! The stand-in records every request so tests can assert on the exact
//! wire payload and headers the client sends.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use cretoai_authz_client::config::DEFAULT_SHARED_SECRET_HEADER;
use cretoai_authz_client::{
    AuthzConfig, AuthzConfigBuilder, CheckMode, CredentialKind, ErrorKind, Resolver, RetryPolicy,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Copy)]
enum Behavior {
    Grant,
    Status(u16),
    Slow(Duration),
    Garbage,
    CheckVerdict(bool),
}

#[derive(Debug, Clone)]
struct Seen {
    path: String,
    body: Value,
    authorization: Option<String>,
    secret: Option<String>,
}

struct StandIn {
    behavior: Behavior,
    calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl StandIn {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn handle(
    State(state): State<Arc<StandIn>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state.seen.lock().unwrap().push(Seen {
        path: uri.path().to_string(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        authorization: header("authorization"),
        secret: header(DEFAULT_SHARED_SECRET_HEADER),
    });

    let grant = || {
        Json(json!({
            "subject": "u1",
            "permissions": ["inventory:read"]
        }))
        .into_response()
    };

    match state.behavior {
        Behavior::Grant => grant(),
        Behavior::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap();
            (status, "stand-in refusal").into_response()
        }
        Behavior::Slow(delay) => {
            tokio::time::sleep(delay).await;
            grant()
        }
        Behavior::Garbage => (StatusCode::OK, "<html>not json</html>").into_response(),
        Behavior::CheckVerdict(allowed) => {
            Json(json!({"allowed": allowed, "permitted_actions": ["read"]})).into_response()
        }
    }
}

/// Serve the stand-in on an ephemeral port and return its base URL
async fn spawn_stand_in(behavior: Behavior) -> (String, Arc<StandIn>) {
    let state = Arc::new(StandIn {
        behavior,
        calls: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/authz", post(handle))
        .route("/authz/check", post(handle))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn builder(base_url: &str) -> AuthzConfigBuilder {
    AuthzConfig::builder()
        .base_url(base_url)
        .timeout(Duration::from_secs(2))
        .retry(RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
        })
}

fn resolver(config: AuthzConfig) -> Resolver {
    Resolver::new(config).unwrap()
}

#[tokio::test]
async fn test_resolve_sends_exactly_one_credential_field() {
    let (url, stand_in) = spawn_stand_in(Behavior::Grant).await;
    let resolver = resolver(builder(&url).build_without_env().unwrap());

    let credential = resolver.credential("tok").unwrap();
    let auth = resolver.resolve(&credential).await.unwrap();

    assert_eq!(auth.subject(), "u1");
    assert!(auth.has_permission("inventory:read"));

    let seen = stand_in.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path, "/authz");
    assert_eq!(seen[0].body, json!({"id_token": "tok"}));
    assert_eq!(seen[0].authorization.as_deref(), Some("Bearer tok"));
    assert_eq!(seen[0].secret, None);
}

#[tokio::test]
async fn test_shared_secret_header_when_configured() {
    let (url, stand_in) = spawn_stand_in(Behavior::Grant).await;
    let config = builder(&url)
        .shared_secret("s3cret")
        .credential_kind(CredentialKind::SessionToken)
        .build_without_env()
        .unwrap();
    let resolver = resolver(config);

    let credential = resolver.credential("sess").unwrap();
    resolver.resolve(&credential).await.unwrap();

    let seen = stand_in.seen();
    assert_eq!(seen[0].body, json!({"session_token": "sess"}));
    assert_eq!(seen[0].secret.as_deref(), Some("s3cret"));
}

#[tokio::test]
async fn test_unauthorized_status_maps_to_unauthenticated() {
    let (url, stand_in) = spawn_stand_in(Behavior::Status(401)).await;
    let resolver = resolver(builder(&url).build_without_env().unwrap());

    let credential = resolver.credential("expired").unwrap();
    let err = resolver.resolve(&credential).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(err.kind().http_status(), 401);
    assert_eq!(stand_in.calls(), 1);
}

#[tokio::test]
async fn test_server_error_is_retried_then_unavailable() {
    let (url, stand_in) = spawn_stand_in(Behavior::Status(500)).await;
    let resolver = resolver(builder(&url).build_without_env().unwrap());

    let credential = resolver.credential("tok").unwrap();
    let err = resolver.resolve(&credential).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(stand_in.calls(), 2);
}

#[tokio::test]
async fn test_slow_service_times_out() {
    let (url, stand_in) = spawn_stand_in(Behavior::Slow(Duration::from_secs(2))).await;
    let config = builder(&url)
        .timeout(Duration::from_millis(100))
        .build_without_env()
        .unwrap();
    let resolver = resolver(config);

    let credential = resolver.credential("tok").unwrap();
    let err = resolver.resolve(&credential).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(stand_in.calls(), 2);
}

#[tokio::test]
async fn test_non_json_body_is_invalid_response() {
    let (url, _stand_in) = spawn_stand_in(Behavior::Garbage).await;
    let resolver = resolver(builder(&url).build_without_env().unwrap());

    let credential = resolver.credential("tok").unwrap();
    let err = resolver.resolve(&credential).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    assert_eq!(err.kind().http_status(), 502);
}

#[tokio::test]
async fn test_remote_check_posts_permission() {
    let (url, stand_in) = spawn_stand_in(Behavior::CheckVerdict(true)).await;
    let config = builder(&url)
        .check_mode(CheckMode::Remote)
        .build_without_env()
        .unwrap();
    let resolver = resolver(config);

    let credential = resolver.credential("tok").unwrap();
    let allowed = resolver.check(&credential, "inventory:read").await.unwrap();

    assert_eq!(allowed.permitted_actions, vec!["read"]);
    let seen = stand_in.seen();
    assert_eq!(seen[0].path, "/authz/check");
    assert_eq!(
        seen[0].body,
        json!({"id_token": "tok", "permission": "inventory:read"})
    );
}

#[tokio::test]
async fn test_remote_check_denial_is_forbidden() {
    let (url, _stand_in) = spawn_stand_in(Behavior::CheckVerdict(false)).await;
    let config = builder(&url)
        .check_mode(CheckMode::Remote)
        .build_without_env()
        .unwrap();
    let resolver = resolver(config);

    let credential = resolver.credential("tok").unwrap();
    let err = resolver.check(&credential, "inventory:create").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_connection_refused_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let resolver = resolver(builder(&format!("http://{}", addr)).build_without_env().unwrap());
    let credential = resolver.credential("tok").unwrap();
    let err = resolver.resolve(&credential).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    assert_eq!(resolver.metrics().transport_calls, 2);
}
