mod support;

use reqwest::StatusCode;
use serde_json::{json, Value};
use support::TestServer;
use tidepool_core::{CloseSessionResponse, ErrorBody, Session, SessionListResponse, SessionStatus};

async fn create(server: &TestServer, project: &str, body: Value) -> Session {
    let mut body = body;
    body["project_id"] = json!(project);
    let response = server
        .http
        .post(server.url("/terminal/create"))
        .json(&body)
        .send()
        .await
        .expect("create request");
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.expect("session body")
}

async fn list(server: &TestServer, project: &str) -> SessionListResponse {
    server
        .http
        .get(server.url(&format!("/terminal/sessions/{project}")))
        .send()
        .await
        .expect("list request")
        .json()
        .await
        .expect("list body")
}

#[test_timeout::tokio_timeout_test]
async fn health_reports_ok() {
    let server = TestServer::spawn().await;
    let body: Value = server
        .http
        .get(server.url("/healthz"))
        .send()
        .await
        .expect("health")
        .json()
        .await
        .expect("json");
    assert_eq!(body, json!({ "status": "ok" }));
}

#[test_timeout::tokio_timeout_test]
async fn create_defaults_to_bash_and_lists_running() {
    let server = TestServer::spawn().await;
    let session = create(&server, "p1", json!({})).await;
    assert_eq!(session.display_name, "bash");
    assert_eq!(session.status, SessionStatus::Running);

    let listing = list(&server, "p1").await;
    assert_eq!(listing.sessions.len(), 1);
    assert_eq!(listing.sessions[0].id, session.id);
    assert_eq!(listing.active_session_id, Some(session.id));
    assert!(list(&server, "p2").await.sessions.is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn active_session_is_the_oldest() {
    let server = TestServer::spawn().await;
    let first = create(&server, "p1", json!({ "name": "bash" })).await;
    let second = create(&server, "p1", json!({ "name": "claude" })).await;
    let listing = list(&server, "p1").await;
    let ids: Vec<_> = listing.sessions.iter().map(|s| s.id.clone()).collect();
    assert_eq!(ids, vec![first.id.clone(), second.id]);
    assert_eq!(listing.active_session_id, Some(first.id));
}

#[test_timeout::tokio_timeout_test]
async fn delete_is_idempotent() {
    let server = TestServer::spawn().await;
    let session = create(&server, "p1", json!({})).await;
    let url = server.url(&format!("/terminal/{}", session.id));

    for expected in [true, false] {
        let response = server.http.delete(&url).send().await.expect("delete");
        assert_eq!(response.status(), StatusCode::OK);
        let body: CloseSessionResponse = response.json().await.expect("body");
        assert_eq!(body.removed, expected);
    }
    assert!(list(&server, "p1").await.sessions.is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn clear_stop_and_kill_report_unknown_sessions() {
    let server = TestServer::spawn().await;
    for action in ["clear", "stop", "kill"] {
        let response = server
            .http
            .post(server.url(&format!("/terminal/missing/{action}")))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{action}");
        let body: ErrorBody = response.json().await.expect("error body");
        assert!(body.message.contains("missing"));
    }
}

#[test_timeout::tokio_timeout_test]
async fn clear_is_no_content_and_stop_keeps_the_session_listed() {
    let server = TestServer::spawn().await;
    let session = create(&server, "p1", json!({})).await;

    let cleared = server
        .http
        .post(server.url(&format!("/terminal/{}/clear", session.id)))
        .send()
        .await
        .expect("clear");
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    let stopped: Session = server
        .http
        .post(server.url(&format!("/terminal/{}/stop", session.id)))
        .send()
        .await
        .expect("stop")
        .json()
        .await
        .expect("session");
    assert_eq!(stopped.status, SessionStatus::Stopped);

    let listing = list(&server, "p1").await;
    assert_eq!(listing.sessions.len(), 1);
    assert_eq!(listing.sessions[0].status, SessionStatus::Stopped);
}

#[test_timeout::tokio_timeout_test]
async fn project_ids_that_escape_the_workspace_are_rejected() {
    let server = TestServer::spawn().await;
    let response = server
        .http
        .post(server.url("/terminal/create"))
        .json(&json!({ "project_id": "..", "name": "bash" }))
        .send()
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.state.sessions.is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn metrics_are_absent_without_a_recorder() {
    let server = TestServer::spawn().await;
    let response = server.http.get(server.url("/metrics")).send().await.expect("metrics");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
