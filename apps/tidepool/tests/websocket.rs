use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use tidepool_client::{Connector, Link, LinkEvent, TransportError, WebSocketConnector};
use tidepool_core::{decode_frame, encode_frame, CloseReason, Frame, SessionId, ViewportGeometry};
use tokio::net::TcpListener;
use tokio::time::timeout;

/// Answers the first frame with its own debug text, then ends the stream
/// with `Close(process_exited)`.
async fn stream(Path(id): Path<String>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| answer_once(socket, id))
}

async fn answer_once(mut socket: WebSocket, id: String) {
    let Some(Ok(Message::Binary(bytes))) = socket.recv().await else {
        return;
    };
    let Ok(frame) = decode_frame(&bytes) else {
        return;
    };
    let reply = format!("{id}:{frame:?}");
    let _ = socket
        .send(Message::Binary(encode_frame(&Frame::Data(reply.into_bytes()))))
        .await;
    let _ = socket
        .send(Message::Binary(encode_frame(&Frame::Close(CloseReason::ProcessExited))))
        .await;
    let _ = socket.send(Message::Close(None)).await;
}

async fn next(link: &mut Link) -> LinkEvent {
    timeout(Duration::from_secs(5), link.recv())
        .await
        .expect("event in time")
}

async fn spawn_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let router = Router::new().route("/ws/terminal/:id", get(stream));
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

#[test_timeout::tokio_timeout_test]
async fn frames_travel_both_ways_and_the_close_reason_arrives_first() {
    let addr = spawn_backend().await;
    let connector = WebSocketConnector::new(&format!("http://{addr}")).expect("connector");
    let mut link = connector
        .connect(&SessionId::from("s1"))
        .await
        .expect("connect");

    link.send(Frame::Resize(ViewportGeometry::new(120, 40)))
        .expect("send");

    match next(&mut link).await {
        LinkEvent::Frame(Frame::Data(bytes)) => {
            let text = String::from_utf8(bytes).expect("utf8");
            assert!(text.starts_with("s1:Resize"), "{text}");
        }
        other => panic!("expected data, got {other:?}"),
    }
    assert_eq!(
        next(&mut link).await,
        LinkEvent::Frame(Frame::Close(CloseReason::ProcessExited))
    );
    assert_eq!(next(&mut link).await, LinkEvent::Closed);
}

#[test_timeout::tokio_timeout_test]
async fn refused_connection_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let connector = WebSocketConnector::new(&format!("http://{addr}")).expect("connector");
    let err = connector
        .connect(&SessionId::from("s1"))
        .await
        .expect_err("nothing listening");
    assert!(matches!(err, TransportError::Connect(_)));
}
