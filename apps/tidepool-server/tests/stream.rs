mod support;

use futures_util::SinkExt;
use support::{next_frame, read_until, send, TestServer};
use tidepool_core::{CloseReason, Frame, ProjectId, SessionStatus, ViewportGeometry};
use tokio_tungstenite::tungstenite::Message;

fn create(server: &TestServer) -> String {
    server
        .state
        .sessions
        .create(&ProjectId::from("p1"), "bash")
        .expect("create")
        .id
        .to_string()
}

#[test_timeout::tokio_timeout_test]
async fn unknown_session_is_closed_with_a_reason() {
    let server = TestServer::spawn().await;
    let mut socket = server.stream("nope").await;
    assert_eq!(
        next_frame(&mut socket).await,
        Some(Frame::Close(CloseReason::SessionNotFound))
    );
    assert_eq!(next_frame(&mut socket).await, None);
}

#[test_timeout::tokio_timeout_test]
async fn keystrokes_round_trip_through_the_shell() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    send(&mut socket, &Frame::Resize(ViewportGeometry::new(80, 24))).await;
    send(&mut socket, &Frame::Data(b"echo ws-$((40+2))\n".to_vec())).await;
    let (seen, interrupted) = read_until(&mut socket, "ws-42").await;
    assert!(interrupted.is_none(), "stream ended early: {interrupted:?}");
    assert!(seen.contains("ws-42"));
}

#[test_timeout::tokio_timeout_test]
async fn text_messages_are_raw_input() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    socket
        .send(Message::Text("echo text-$((5*5))\n".into()))
        .await
        .expect("send text");
    let (seen, _) = read_until(&mut socket, "text-25").await;
    assert!(seen.contains("text-25"));
}

#[test_timeout::tokio_timeout_test]
async fn resize_frames_reach_the_pty() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    send(&mut socket, &Frame::Resize(ViewportGeometry::new(100, 30))).await;
    send(&mut socket, &Frame::Data(b"stty size\n".to_vec())).await;
    let (seen, _) = read_until(&mut socket, "30 100").await;
    assert!(seen.contains("30 100"));
}

#[test_timeout::tokio_timeout_test]
async fn reattaching_replays_scrollback() {
    let server = TestServer::spawn().await;
    let id = create(&server);

    let mut first = server.stream(&id).await;
    send(&mut first, &Frame::Data(b"echo replay-$((3*3))\n".to_vec())).await;
    read_until(&mut first, "replay-9").await;
    drop(first);

    let mut second = server.stream(&id).await;
    match next_frame(&mut second).await {
        Some(Frame::Data(bytes)) => assert!(String::from_utf8_lossy(&bytes).contains("replay-9")),
        other => panic!("expected replay, got {other:?}"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn process_exit_closes_the_stream_and_stops_the_session() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    send(&mut socket, &Frame::Data(b"exit\n".to_vec())).await;
    let (_, ending) = read_until(&mut socket, "never printed").await;
    assert_eq!(ending, Some(Frame::Close(CloseReason::ProcessExited)));

    let session = server
        .state
        .sessions
        .get(&id.as_str().into())
        .expect("still listed");
    assert_eq!(session.status, SessionStatus::Stopped);
}

#[test_timeout::tokio_timeout_test]
async fn removing_a_session_ends_its_stream() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    let removed = server
        .http
        .delete(server.url(&format!("/terminal/{id}")))
        .send()
        .await
        .expect("delete");
    assert!(removed.status().is_success());
    let (_, ending) = read_until(&mut socket, "never printed").await;
    assert_eq!(ending, Some(Frame::Close(CloseReason::ProcessExited)));
}

#[test_timeout::tokio_timeout_test]
async fn shutdown_closes_open_streams() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;
    send(&mut socket, &Frame::Data(b"echo up\n".to_vec())).await;
    read_until(&mut socket, "up").await;

    server.state.shutdown.send_replace(true);
    let (_, ending) = read_until(&mut socket, "never printed").await;
    assert_eq!(ending, Some(Frame::Close(CloseReason::Shutdown)));
}

#[test_timeout::tokio_timeout_test]
async fn input_for_a_removed_session_ends_with_a_close_frame() {
    let server = TestServer::spawn().await;
    let id = create(&server);
    let mut socket = server.stream(&id).await;

    assert!(server.state.sessions.remove(&id.as_str().into()));
    send(&mut socket, &Frame::Data(b"echo late\n".to_vec())).await;

    let (_, ending) = read_until(&mut socket, "never printed").await;
    assert!(
        matches!(
            ending,
            Some(Frame::Close(CloseReason::SessionNotFound | CloseReason::ProcessExited))
        ),
        "stream ended without a close frame: {ending:?}"
    );
}
