#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tidepool_core::{decode_frame, encode_frame, Frame};
use tidepool_server::{build_router, AppState, SessionConfig, SessionManager};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub http: reqwest::Client,
}

impl TestServer {
    /// Router on an ephemeral port with `/bin/sh` sessions in a scratch
    /// workspace.
    pub async fn spawn() -> Self {
        let workspace = std::env::temp_dir().join(format!("tidepool-server-{}", uuid::Uuid::new_v4()));
        let sessions = SessionManager::new(SessionConfig::new(workspace, "/bin/sh"));
        let state = Arc::new(AppState::new(sessions, None));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let router = build_router(Arc::clone(&state));
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Self {
            addr,
            state,
            http: reqwest::Client::new(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stream(&self, session_id: &str) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}/ws/terminal/{}", self.addr, session_id))
            .await
            .expect("websocket connect");
        socket
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.state.sessions.shutdown();
    }
}

pub async fn send(socket: &mut Socket, frame: &Frame) {
    socket
        .send(Message::Binary(encode_frame(frame)))
        .await
        .expect("send frame");
}

/// Next decoded frame, `None` once the socket is closed.
pub async fn next_frame(socket: &mut Socket) -> Option<Frame> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), socket.next())
            .await
            .expect("frame in time")?;
        match message.ok()? {
            Message::Binary(bytes) => return Some(decode_frame(&bytes).expect("valid frame")),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

/// Reads data frames until their text contains `needle`. Returns all text
/// seen and the first non-data frame, if one arrived first.
pub async fn read_until(socket: &mut Socket, needle: &str) -> (String, Option<Frame>) {
    let mut seen = String::new();
    while !seen.contains(needle) {
        match next_frame(socket).await {
            Some(Frame::Data(bytes)) => seen.push_str(&String::from_utf8_lossy(&bytes)),
            other => return (seen, other),
        }
    }
    (seen, None)
}
