use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{Frame, SessionId};
use tokio::sync::{mpsc, Notify};

use super::{Connector, Link, LinkEvent};
use crate::error::TransportError;

/// In-process connector for tests.
///
/// Every successful `connect` hands the test a [`MockRemote`] standing in
/// for the backend end of the stream. Connects can be held open until
/// released, or made to fail.
pub struct MockConnector {
    remotes: mpsc::UnboundedSender<MockRemote>,
    gates: Mutex<HashMap<SessionId, Arc<Notify>>>,
    failing: Mutex<HashSet<SessionId>>,
}

/// Backend side of one mock link.
pub struct MockRemote {
    pub session_id: SessionId,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
    pub to_client: mpsc::UnboundedSender<LinkEvent>,
}

impl MockRemote {
    pub fn send_output(&self, bytes: &[u8]) -> bool {
        self.to_client
            .send(LinkEvent::Frame(Frame::Data(bytes.to_vec())))
            .is_ok()
    }

    pub fn send_event(&self, event: LinkEvent) -> bool {
        self.to_client.send(event).is_ok()
    }

    /// True once the client dropped its end of the link.
    pub fn is_released(&self) -> bool {
        self.to_client.is_closed()
    }

    /// Frames the client has sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (remotes, rx) = mpsc::unbounded_channel();
        let connector = Self {
            remotes,
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        };
        (connector, rx)
    }

    /// Holds connects to `session_id` until the returned handle is notified.
    pub fn hold(&self, session_id: &SessionId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(session_id.clone(), gate.clone());
        gate
    }

    pub fn fail(&self, session_id: &SessionId) {
        self.failing.lock().insert(session_id.clone());
    }

    pub fn recover(&self, session_id: &SessionId) {
        self.failing.lock().remove(session_id);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, session_id: &SessionId) -> Result<Link, TransportError> {
        let gate = self.gates.lock().get(session_id).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.lock().contains(session_id) {
            return Err(TransportError::Connect(format!(
                "mock refused {}",
                session_id
            )));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let remote = MockRemote {
            session_id: session_id.clone(),
            from_client: out_rx,
            to_client: in_tx,
        };
        self.remotes
            .send(remote)
            .map_err(|_| TransportError::Connect("mock harness dropped".into()))?;
        Ok(Link::new(out_tx, in_rx))
    }
}
