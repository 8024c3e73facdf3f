//! One live duplex stream bound to one session.
//!
//! The connection carries no policy: it frames input, reports output and
//! turns the end of the stream into exactly one advisory notice. Retrying is
//! somebody else's business.

use std::fmt;

use tidepool_core::{CloseReason, Frame, SessionId, ViewportGeometry};
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::transport::{Link, LinkEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// How a stream ended, as seen from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// The stream ended; `None` means no close frame preceded the end.
    Closed(Option<CloseReason>),
    /// Transport fault below the frame layer.
    Error(String),
}

impl Ending {
    /// Endings worth a supervised reconnect: faults, ends without a close
    /// frame, and server shutdowns.
    pub fn is_abnormal(&self) -> bool {
        matches!(
            self,
            Ending::Error(_) | Ending::Closed(None) | Ending::Closed(Some(CloseReason::Shutdown))
        )
    }

    pub fn notice(&self) -> Notice {
        match self {
            Ending::Closed(_) => Notice::Disconnected,
            Ending::Error(_) => Notice::ConnectionError,
        }
    }
}

impl fmt::Display for Ending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ending::Closed(Some(reason)) => write!(f, "closed ({reason})"),
            Ending::Closed(None) => f.write_str("closed (abnormal)"),
            Ending::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Advisory, in-band lines for the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Disconnected,
    ConnectionError,
    Reconnecting { attempt: u32, max_attempts: u32, delay_secs: u64 },
    ReconnectAbandoned,
    Failure(String),
}

impl Notice {
    pub fn render(&self) -> String {
        match self {
            Notice::Disconnected => "\r\n\x1b[90m[Disconnected]\x1b[0m\r\n".to_string(),
            Notice::ConnectionError => "\r\n\x1b[31m[Connection error]\x1b[0m\r\n".to_string(),
            Notice::Reconnecting {
                attempt,
                max_attempts,
                delay_secs,
            } => format!(
                "\r\n\x1b[90m[Reconnecting in {delay_secs}s, attempt {attempt}/{max_attempts}]\x1b[0m\r\n"
            ),
            Notice::ReconnectAbandoned => "\r\n\x1b[90m[Reconnect abandoned]\x1b[0m\r\n".to_string(),
            Notice::Failure(message) => format!("\r\n\x1b[31m[{message}]\x1b[0m\r\n"),
        }
    }
}

/// Result of feeding one link event through the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Output(Vec<u8>),
    Ended(Ending),
}

#[derive(Debug)]
pub struct TransportConnection {
    id: u64,
    session_id: SessionId,
    state: ConnectionState,
    link: Option<Link>,
}

impl TransportConnection {
    pub fn new(id: u64, session_id: SessionId) -> Self {
        Self {
            id,
            session_id,
            state: ConnectionState::Connecting,
            link: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Binds an established link. The geometry goes out before anything
    /// else can be queued on it.
    pub fn attach(&mut self, link: Link, geometry: ViewportGeometry) -> Result<(), TransportError> {
        link.send(Frame::Resize(geometry))?;
        self.link = Some(link);
        self.state = ConnectionState::Open;
        debug!(
            target = "tidepool::connection",
            session_id = %self.session_id,
            connection_id = self.id,
            %geometry,
            "connection open"
        );
        Ok(())
    }

    /// Queues a frame. Silently dropped unless the connection is open.
    pub fn send(&mut self, frame: Frame) -> bool {
        if self.state != ConnectionState::Open {
            trace!(target = "tidepool::connection", connection_id = self.id, "dropping frame, not open");
            return false;
        }
        match self.link.as_ref().map(|link| link.send(frame)) {
            Some(Ok(())) => true,
            _ => false,
        }
    }

    pub fn send_input(&mut self, bytes: &[u8]) -> bool {
        self.send(Frame::Data(bytes.to_vec()))
    }

    /// Best-effort local close. Queues a close frame and drops the link
    /// without waiting for acknowledgement. No notice is produced.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Open {
            self.send(Frame::Close(CloseReason::ClientRequested));
        }
        self.link = None;
        self.state = ConnectionState::Closed;
    }

    /// Waits for the next link event. Never resolves without a link.
    pub async fn recv(&mut self) -> LinkEvent {
        match self.link.as_mut() {
            Some(link) => link.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Applies one inbound event. Once closed, nothing else comes out.
    pub fn handle(&mut self, event: LinkEvent) -> Option<Inbound> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        match event {
            LinkEvent::Frame(Frame::Data(bytes)) => Some(Inbound::Output(bytes)),
            LinkEvent::Frame(Frame::Resize(geometry)) => {
                trace!(target = "tidepool::connection", connection_id = self.id, %geometry, "resize acknowledged");
                None
            }
            LinkEvent::Frame(Frame::Close(reason)) => Some(self.end(Ending::Closed(Some(reason)))),
            LinkEvent::Closed => Some(self.end(Ending::Closed(None))),
            LinkEvent::Error(message) => Some(self.end(Ending::Error(message))),
        }
    }

    fn end(&mut self, ending: Ending) -> Inbound {
        debug!(
            target = "tidepool::connection",
            session_id = %self.session_id,
            connection_id = self.id,
            %ending,
            "connection ended"
        );
        self.link = None;
        self.state = ConnectionState::Closed;
        Inbound::Ended(ending)
    }
}
