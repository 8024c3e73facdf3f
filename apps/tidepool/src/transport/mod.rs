use async_trait::async_trait;
use tidepool_core::{Frame, SessionId};
use tokio::sync::mpsc;

use crate::error::TransportError;

pub mod mock;
pub mod websocket;

pub use mock::{MockConnector, MockRemote};
pub use websocket::WebSocketConnector;

/// What the remote side of a link reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame(Frame),
    /// The stream ended. A close frame, if any, was delivered before this.
    Closed,
    /// The stream failed below the frame layer.
    Error(String),
}

/// Opens duplex links to session stream endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session_id: &SessionId) -> Result<Link, TransportError>;
}

/// One established duplex stream.
///
/// Dropping a link releases it: the outbound queue is closed, so whatever
/// was already queued is flushed and the underlying stream shut down by the
/// task that owns it.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
}

impl Link {
    pub fn new(
        outbound: mpsc::UnboundedSender<Frame>,
        inbound: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    pub fn send(&self, frame: Frame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    /// Next inbound event. A vanished peer task reads as `Closed`.
    pub async fn recv(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed)
    }
}
