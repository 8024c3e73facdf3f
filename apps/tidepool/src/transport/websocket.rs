use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tidepool_core::{decode_frame, encode_frame, Frame, SessionId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::{Connector, Link, LinkEvent};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `/ws/terminal/{id}` on the session backend.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    base: Url,
}

impl WebSocketConnector {
    /// `server` is the backend's HTTP base URL; the scheme is swapped for
    /// the matching WebSocket one.
    pub fn new(server: &str) -> Result<Self, TransportError> {
        let mut base =
            Url::parse(server).map_err(|err| TransportError::Connect(err.to_string()))?;
        let scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::Connect(format!(
                    "unsupported scheme {other}"
                )))
            }
        };
        base.set_scheme(scheme)
            .map_err(|_| TransportError::Connect("cannot switch url scheme".into()))?;
        Ok(Self { base })
    }

    pub fn stream_url(&self, session_id: &SessionId) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Connect("server url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["ws", "terminal", session_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, session_id: &SessionId) -> Result<Link, TransportError> {
        let url = self.stream_url(session_id)?;
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(target = "tidepool::transport", session_id = %session_id, %url, "websocket connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(ws, outbound_rx, inbound_tx, session_id.clone()));
        Ok(Link::new(outbound_tx, inbound_rx))
    }
}

async fn pump(
    ws: WsStream,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    inbound_tx: mpsc::UnboundedSender<LinkEvent>,
    session_id: SessionId,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(err) = sink.send(Message::Binary(encode_frame(&frame))).await {
                        let _ = inbound_tx.send(LinkEvent::Error(err.to_string()));
                        return;
                    }
                }
                None => {
                    // Link dropped: everything queued has been written.
                    let _ = sink.close().await;
                    debug!(target = "tidepool::transport", session_id = %session_id, "websocket released");
                    return;
                }
            },
            message = stream.next() => match message {
                Some(Ok(Message::Binary(bytes))) => match decode_frame(&bytes) {
                    Ok(frame) => {
                        let _ = inbound_tx.send(LinkEvent::Frame(frame));
                    }
                    Err(err) => {
                        warn!(target = "tidepool::transport", session_id = %session_id, error = %err, "dropping undecodable frame");
                    }
                },
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound_tx.send(LinkEvent::Frame(Frame::Data(text.into_bytes())));
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = inbound_tx.send(LinkEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = inbound_tx.send(LinkEvent::Error(err.to_string()));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn stream_url_swaps_scheme_and_appends_path() {
        let connector = WebSocketConnector::new("http://127.0.0.1:19080").expect("connector");
        let url = connector
            .stream_url(&SessionId::from("abc"))
            .expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:19080/ws/terminal/abc");

        let connector = WebSocketConnector::new("https://dev.example.com/tp/").expect("connector");
        let url = connector
            .stream_url(&SessionId::from("abc"))
            .expect("url");
        assert_eq!(url.as_str(), "wss://dev.example.com/tp/ws/terminal/abc");
    }

    #[test_timeout::timeout]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            WebSocketConnector::new("ftp://host"),
            Err(TransportError::Connect(_))
        ));
    }
}
