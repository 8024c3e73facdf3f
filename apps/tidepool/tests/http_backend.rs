use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::json;
use tidepool_client::{ClientError, HttpSessionBackend, SessionBackend};
use tidepool_core::{
    CreateSessionRequest, ProjectId, Session, SessionId, SessionListResponse, SessionStatus,
};
use tokio::net::TcpListener;

type Sessions = Arc<Mutex<Vec<Session>>>;

async fn create(State(sessions): State<Sessions>, Json(request): Json<CreateSessionRequest>) -> Json<Session> {
    let session = Session::new(SessionId::generate(), request.project_id, request.name);
    sessions.lock().push(session.clone());
    Json(session)
}

async fn list(State(sessions): State<Sessions>, Path(project): Path<String>) -> Json<SessionListResponse> {
    let sessions: Vec<Session> = sessions
        .lock()
        .iter()
        .filter(|s| s.project_id.as_str() == project)
        .cloned()
        .collect();
    let active_session_id = sessions.first().map(|s| s.id.clone());
    Json(SessionListResponse {
        sessions,
        active_session_id,
    })
}

/// Answers 404 for unknown ids, like an older backend would.
async fn remove(State(sessions): State<Sessions>, Path(id): Path<String>) -> impl IntoResponse {
    let mut sessions = sessions.lock();
    let before = sessions.len();
    sessions.retain(|s| s.id.as_str() != id);
    if sessions.len() == before {
        return (StatusCode::NOT_FOUND, Json(json!({ "message": "no such session" })));
    }
    (StatusCode::OK, Json(json!({ "removed": true })))
}

async fn clear() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "message": "pty host restarting" })),
    )
}

async fn stop(Path(id): Path<String>) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": format!("session {id} not found") })),
    )
}

async fn spawn_backend() -> (SocketAddr, Sessions) {
    let sessions: Sessions = Arc::default();
    let router = Router::new()
        .route("/terminal/create", post(create))
        .route("/terminal/sessions/:project", get(list))
        .route("/terminal/:id", delete(remove))
        .route("/terminal/:id/clear", post(clear))
        .route("/terminal/:id/stop", post(stop))
        .with_state(Arc::clone(&sessions));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    (addr, sessions)
}

#[test_timeout::tokio_timeout_test]
async fn create_list_close_against_a_live_backend() {
    let (addr, sessions) = spawn_backend().await;
    let backend = HttpSessionBackend::new(&addr.to_string()).expect("backend");
    let project = ProjectId::from("p1");

    let session = backend.create(&project, "bash").await.expect("create");
    assert_eq!(session.status, SessionStatus::Running);
    assert_eq!(session.display_name, "bash");

    let listing = backend.list(&project).await.expect("list");
    assert_eq!(listing.sessions, vec![session.clone()]);
    assert_eq!(listing.active_session_id, Some(session.id.clone()));

    backend.close(&session.id).await.expect("close");
    assert!(sessions.lock().is_empty());
    // A 404 on close means the session is already gone.
    backend.close(&session.id).await.expect("second close");
}

#[test_timeout::tokio_timeout_test]
async fn server_errors_are_unavailable_and_client_errors_are_rejections() {
    let (addr, _sessions) = spawn_backend().await;
    let backend = HttpSessionBackend::new(&format!("http://{addr}")).expect("backend");
    let id = SessionId::from("s1");

    let err = backend.clear(&id).await.expect_err("503");
    assert!(err.is_unavailable());
    assert!(err.to_string().contains("pty host restarting"));

    match backend.stop(&id).await.expect_err("404") {
        ClientError::BackendRejected { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "session s1 not found");
        }
        other => panic!("expected rejection, got {other:?}"),
    }
}
