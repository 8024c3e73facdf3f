use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use metrics::{counter, decrement_gauge, increment_gauge};
use tidepool_core::{decode_frame, encode_frame, CloseReason, Frame, SessionId};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::ServerError;
use crate::registry::{Attachment, SessionManager, StreamEvent};
use crate::AppState;

/// How long the writer gets to flush a close frame the input side asked for.
const CLOSE_FLUSH: Duration = Duration::from_secs(1);

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let sessions = state.sessions.clone();
    let shutdown = state.shutdown.subscribe();
    ws.on_upgrade(move |socket| stream_session(socket, sessions, SessionId::from(session_id), shutdown))
}

async fn stream_session(
    socket: WebSocket,
    sessions: SessionManager,
    session_id: SessionId,
    shutdown: watch::Receiver<bool>,
) {
    let (mut ws_tx, ws_rx) = socket.split();

    let Some(attachment) = sessions.attach(&session_id) else {
        debug!(session_id = %session_id, "stream requested for unknown session");
        let _ = send_frame(&mut ws_tx, &Frame::Close(CloseReason::SessionNotFound)).await;
        let _ = ws_tx.close().await;
        return;
    };

    increment_gauge!("tidepool_ws_connections_active", 1.0);
    counter!("tidepool_ws_connections_total", 1);
    info!(session_id = %session_id, replay_bytes = attachment.replay.len(), "stream attached");

    let (input_end_tx, input_end_rx) = oneshot::channel();
    let mut writer = tokio::spawn(forward_output(
        ws_tx,
        attachment,
        session_id.clone(),
        shutdown,
        input_end_rx,
    ));
    tokio::select! {
        _ = &mut writer => {}
        ended = forward_input(ws_rx, &sessions, &session_id) => {
            if let Some(reason) = ended {
                let _ = input_end_tx.send(reason);
                if tokio::time::timeout(CLOSE_FLUSH, &mut writer).await.is_err() {
                    debug!(session_id = %session_id, "close frame not flushed in time");
                }
            }
        }
    }
    writer.abort();

    decrement_gauge!("tidepool_ws_connections_active", 1.0);
    info!(session_id = %session_id, "stream detached");
}

/// Replay first, then live output, then the close frame.
async fn forward_output(
    mut ws_tx: SplitSink<WebSocket, Message>,
    attachment: Attachment,
    session_id: SessionId,
    mut shutdown: watch::Receiver<bool>,
    input_end: oneshot::Receiver<CloseReason>,
) {
    let mut input_end = Some(input_end);
    let Attachment {
        replay,
        mut events,
        exited,
    } = attachment;

    if !replay.is_empty() && send_frame(&mut ws_tx, &Frame::Data(replay)).await.is_err() {
        return;
    }
    let reason = if exited {
        CloseReason::ProcessExited
    } else {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(StreamEvent::Output(bytes)) => {
                        counter!("tidepool_bytes_forwarded_total", bytes.len() as u64);
                        if send_frame(&mut ws_tx, &Frame::Data(bytes.to_vec())).await.is_err() {
                            return;
                        }
                    }
                    Ok(StreamEvent::Exited) | Err(broadcast::error::RecvError::Closed) => {
                        break CloseReason::ProcessExited;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id = %session_id, skipped, "slow stream consumer; output dropped");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break CloseReason::Shutdown;
                    }
                }
                reason = input_ended(&mut input_end) => break reason,
            }
        }
    };

    debug!(session_id = %session_id, %reason, "closing stream");
    let _ = send_frame(&mut ws_tx, &Frame::Close(reason)).await;
    let _ = ws_tx.close().await;
}

/// Resolves once the input side reports why the stream must end.
async fn input_ended(input_end: &mut Option<oneshot::Receiver<CloseReason>>) -> CloseReason {
    if let Some(receiver) = input_end.as_mut() {
        if let Ok(reason) = receiver.await {
            return reason;
        }
    }
    *input_end = None;
    std::future::pending().await
}

/// Client frames until the client closes. Text messages are raw input.
///
/// Returns the close reason to send when the session itself can no longer
/// take input; `None` when the client ended the stream.
async fn forward_input(
    mut ws_rx: SplitStream<WebSocket>,
    sessions: &SessionManager,
    session_id: &SessionId,
) -> Option<CloseReason> {
    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "error receiving message");
                return None;
            }
        };
        let frame = match message {
            Message::Binary(bytes) => match decode_frame(&bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "undecodable frame ignored");
                    continue;
                }
            },
            Message::Text(text) => Frame::Data(text.into_bytes()),
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let outcome = match frame {
            Frame::Data(bytes) => sessions.write(session_id, &bytes).await,
            Frame::Resize(geometry) => sessions.resize(session_id, geometry),
            Frame::Close(reason) => {
                debug!(session_id = %session_id, %reason, "client closed stream");
                return None;
            }
        };
        if let Err(err) = outcome {
            warn!(session_id = %session_id, error = %err, "input not delivered");
            return Some(undelivered_reason(&err));
        }
    }
    None
}

fn undelivered_reason(err: &ServerError) -> CloseReason {
    match err {
        ServerError::SessionNotFound(_) => CloseReason::SessionNotFound,
        _ => CloseReason::ProcessExited,
    }
}

async fn send_frame(ws_tx: &mut SplitSink<WebSocket, Message>, frame: &Frame) -> Result<(), axum::Error> {
    ws_tx.send(Message::Binary(encode_frame(frame))).await
}
