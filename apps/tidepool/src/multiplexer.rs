//! Owns the single active connection and the switching state machine.
//!
//! `switch_to` never blocks: it tears down whatever exists, spawns the
//! connect attempt tagged with a fresh connection id and returns. Results
//! come back through [`Multiplexer::next_event`], where anything carrying an
//! outdated id is discarded together with its link.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tidepool_core::{Frame, SessionId, ViewportGeometry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::{Ending, Inbound, TransportConnection};
use crate::error::TransportError;
use crate::negotiator::ResizeNegotiator;
use crate::transport::{Connector, Link, LinkEvent};

/// Observable multiplexer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxStatus {
    Idle,
    Switching(SessionId),
    Active(SessionId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuxEvent {
    Opened {
        session_id: SessionId,
        connection_id: u64,
    },
    OpenFailed {
        session_id: SessionId,
        connection_id: u64,
        error: TransportError,
    },
    Output {
        session_id: SessionId,
        bytes: Vec<u8>,
    },
    Ended {
        session_id: SessionId,
        connection_id: u64,
        ending: Ending,
    },
}

enum MuxState {
    Idle,
    Switching {
        session_id: SessionId,
        connection_id: u64,
        task: JoinHandle<()>,
    },
    Active {
        connection: TransportConnection,
    },
}

struct ConnectOutcome {
    connection_id: u64,
    session_id: SessionId,
    result: Result<Link, TransportError>,
}

pub struct Multiplexer {
    connector: Arc<dyn Connector>,
    state: MuxState,
    negotiator: ResizeNegotiator,
    open_timeout: Duration,
    next_connection_id: u64,
    outcomes_tx: mpsc::UnboundedSender<ConnectOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ConnectOutcome>,
}

impl Multiplexer {
    pub fn new(connector: Arc<dyn Connector>, config: &ClientConfig) -> Self {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Self {
            connector,
            state: MuxState::Idle,
            negotiator: ResizeNegotiator::new(config.resize_coalesce, config.initial_geometry),
            open_timeout: config.open_timeout,
            next_connection_id: 1,
            outcomes_tx,
            outcomes_rx,
        }
    }

    pub fn status(&self) -> MuxStatus {
        match &self.state {
            MuxState::Idle => MuxStatus::Idle,
            MuxState::Switching { session_id, .. } => MuxStatus::Switching(session_id.clone()),
            MuxState::Active { connection } => MuxStatus::Active(connection.session_id().clone()),
        }
    }

    pub fn active_session(&self) -> Option<&SessionId> {
        match &self.state {
            MuxState::Active { connection } => Some(connection.session_id()),
            _ => None,
        }
    }

    /// Identity of the current attempt or connection.
    pub fn connection_id(&self) -> Option<u64> {
        match &self.state {
            MuxState::Idle => None,
            MuxState::Switching { connection_id, .. } => Some(*connection_id),
            MuxState::Active { connection } => Some(connection.id()),
        }
    }

    /// Number of open connections; never more than one.
    pub fn open_connections(&self) -> usize {
        match &self.state {
            MuxState::Active { connection } if connection.is_open() => 1,
            _ => 0,
        }
    }

    pub fn geometry(&self) -> ViewportGeometry {
        self.negotiator.current()
    }

    /// Tears down any existing connection, even one to the same session,
    /// and starts opening a new one. Returns the new connection id.
    pub fn switch_to(&mut self, session_id: SessionId) -> u64 {
        self.teardown();

        let connection_id = self.next_connection_id;
        self.next_connection_id += 1;

        let connector = Arc::clone(&self.connector);
        let outcomes = self.outcomes_tx.clone();
        let open_timeout = self.open_timeout;
        let target = session_id.clone();
        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(open_timeout, connector.connect(&target)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(open_timeout)),
            };
            let _ = outcomes.send(ConnectOutcome {
                connection_id,
                session_id: target,
                result,
            });
        });

        info!(target = "tidepool::mux", session_id = %session_id, connection_id, "switching");
        self.state = MuxState::Switching {
            session_id,
            connection_id,
            task,
        };
        connection_id
    }

    /// Drops to `Idle` without touching the registry.
    pub fn disconnect(&mut self) {
        self.teardown();
    }

    /// Tears down if `session_id` is the one being opened or streamed.
    pub fn release(&mut self, session_id: &SessionId) -> bool {
        let targeted = match &self.state {
            MuxState::Idle => false,
            MuxState::Switching { session_id: id, .. } => id == session_id,
            MuxState::Active { connection } => connection.session_id() == session_id,
        };
        if targeted {
            self.teardown();
        }
        targeted
    }

    pub fn send_input(&mut self, bytes: &[u8]) -> bool {
        match &mut self.state {
            MuxState::Active { connection } => connection.send_input(bytes),
            _ => false,
        }
    }

    /// Feeds a surface geometry change through the negotiator.
    pub fn resize(&mut self, geometry: ViewportGeometry) {
        match &mut self.state {
            MuxState::Active { connection } if connection.is_open() => {
                if let Some(geometry) = self.negotiator.propose(geometry, Instant::now()) {
                    debug!(target = "tidepool::mux", connection_id = connection.id(), %geometry, "resize");
                    connection.send(Frame::Resize(geometry));
                }
            }
            _ => self.negotiator.set_current(geometry),
        }
    }

    /// Waits for the next event worth reporting. Cancel safe.
    pub async fn next_event(&mut self) -> MuxEvent {
        loop {
            let resize_deadline = self
                .negotiator
                .deadline()
                .map(tokio::time::Instant::from_std);
            tokio::select! {
                Some(outcome) = self.outcomes_rx.recv() => {
                    if let Some(event) = self.on_outcome(outcome) {
                        return event;
                    }
                }
                event = recv_active(&mut self.state) => {
                    if let Some(event) = self.on_link_event(event) {
                        return event;
                    }
                }
                _ = sleep_until(resize_deadline) => self.flush_resize(),
            }
        }
    }

    fn on_outcome(&mut self, outcome: ConnectOutcome) -> Option<MuxEvent> {
        let current = matches!(
            &self.state,
            MuxState::Switching { connection_id, .. } if *connection_id == outcome.connection_id
        );
        if !current {
            debug!(
                target = "tidepool::mux",
                session_id = %outcome.session_id,
                connection_id = outcome.connection_id,
                "discarding stale connect result"
            );
            return None;
        }

        let ConnectOutcome {
            connection_id,
            session_id,
            result,
        } = outcome;
        let attached = result.and_then(|link| {
            let mut connection = TransportConnection::new(connection_id, session_id.clone());
            let geometry = self.negotiator.on_connect(Instant::now());
            connection.attach(link, geometry).map(|()| connection)
        });
        match attached {
            Ok(connection) => {
                self.state = MuxState::Active { connection };
                Some(MuxEvent::Opened {
                    session_id,
                    connection_id,
                })
            }
            Err(error) => {
                warn!(target = "tidepool::mux", session_id = %session_id, connection_id, error = %error, "open failed");
                self.state = MuxState::Idle;
                self.negotiator.reset();
                Some(MuxEvent::OpenFailed {
                    session_id,
                    connection_id,
                    error,
                })
            }
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) -> Option<MuxEvent> {
        let MuxState::Active { connection } = &mut self.state else {
            return None;
        };
        match connection.handle(event)? {
            Inbound::Output(bytes) => Some(MuxEvent::Output {
                session_id: connection.session_id().clone(),
                bytes,
            }),
            Inbound::Ended(ending) => {
                let session_id = connection.session_id().clone();
                let connection_id = connection.id();
                info!(target = "tidepool::mux", session_id = %session_id, connection_id, %ending, "stream ended");
                self.state = MuxState::Idle;
                self.negotiator.reset();
                Some(MuxEvent::Ended {
                    session_id,
                    connection_id,
                    ending,
                })
            }
        }
    }

    fn flush_resize(&mut self) {
        let now = Instant::now();
        match &mut self.state {
            MuxState::Active { connection } if connection.is_open() => {
                if let Some(geometry) = self.negotiator.poll(now) {
                    debug!(target = "tidepool::mux", connection_id = connection.id(), %geometry, "coalesced resize");
                    connection.send(Frame::Resize(geometry));
                }
            }
            _ => {
                self.negotiator.poll(now);
            }
        }
    }

    fn teardown(&mut self) {
        match std::mem::replace(&mut self.state, MuxState::Idle) {
            MuxState::Idle => {}
            MuxState::Switching {
                session_id,
                connection_id,
                task,
            } => {
                task.abort();
                debug!(target = "tidepool::mux", session_id = %session_id, connection_id, "aborted pending connect");
            }
            MuxState::Active { mut connection } => {
                connection.close();
                debug!(
                    target = "tidepool::mux",
                    session_id = %connection.session_id(),
                    connection_id = connection.id(),
                    "torn down"
                );
            }
        }
        // An aborted attempt may already have queued its link.
        while let Ok(stale) = self.outcomes_rx.try_recv() {
            debug!(
                target = "tidepool::mux",
                session_id = %stale.session_id,
                connection_id = stale.connection_id,
                "released queued connect result"
            );
        }
        self.negotiator.reset();
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn recv_active(state: &mut MuxState) -> LinkEvent {
    match state {
        MuxState::Active { connection } => connection.recv().await,
        _ => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
