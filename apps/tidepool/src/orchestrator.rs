//! Session lifecycle on top of the registry and the multiplexer.
//!
//! The orchestrator is the only thing an embedder drives. Registry calls are
//! plain async methods; everything that happens on its own (stream output,
//! endings, fit attempts, reconnects) comes out of [`Orchestrator::next_event`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tidepool_core::{
    ProjectId, Session, SessionId, SessionListResponse, SessionStatus, ViewportGeometry,
    DEFAULT_SHELL_NAME,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::connection::Notice;
use crate::error::ClientError;
use crate::fit::{FitController, ViewportProbe};
use crate::multiplexer::{MuxEvent, MuxStatus, Multiplexer};
use crate::registry::SessionBackend;
use crate::summary::SessionSummary;
use crate::supervisor::ReconnectSupervisor;
use crate::transport::Connector;

/// What the rendering side has to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelEvent {
    Output(Vec<u8>),
    Notice(Notice),
    Attached {
        session_id: SessionId,
        connection_id: u64,
    },
    AttachFailed {
        session_id: SessionId,
        error: String,
    },
    SummaryChanged,
    ClearScreen,
}

/// Recent closes remembered so a repeat close skips the backend.
const CLOSED_MEMORY: usize = 256;

type RetryCheck = (SessionId, Result<bool, ClientError>);

pub struct Orchestrator {
    project_id: ProjectId,
    backend: Arc<dyn SessionBackend>,
    mux: Multiplexer,
    fit: FitController,
    probe: Arc<dyn ViewportProbe>,
    supervisor: ReconnectSupervisor,
    summary: SessionSummary,
    selected: Option<SessionId>,
    reported_active: Option<SessionId>,
    pending_launch: HashMap<SessionId, String>,
    closed: VecDeque<SessionId>,
    queued: VecDeque<PanelEvent>,
    retry_tx: mpsc::UnboundedSender<RetryCheck>,
    retry_rx: mpsc::UnboundedReceiver<RetryCheck>,
}

impl Orchestrator {
    pub fn new(
        project_id: ProjectId,
        backend: Arc<dyn SessionBackend>,
        connector: Arc<dyn Connector>,
        probe: Arc<dyn ViewportProbe>,
        config: &ClientConfig,
    ) -> Self {
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        Self {
            project_id,
            backend,
            mux: Multiplexer::new(connector, config),
            fit: FitController::new(config.fit_schedule.clone()),
            probe,
            supervisor: ReconnectSupervisor::new(config.reconnect),
            summary: SessionSummary::default(),
            selected: None,
            reported_active: None,
            pending_launch: HashMap::new(),
            closed: VecDeque::with_capacity(CLOSED_MEMORY),
            queued: VecDeque::new(),
            retry_tx,
            retry_rx,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    pub fn selected(&self) -> Option<&SessionId> {
        self.selected.as_ref()
    }

    /// The session the backend reported as active in the latest listing.
    pub fn reported_active(&self) -> Option<&SessionId> {
        self.reported_active.as_ref()
    }

    pub fn status(&self) -> MuxStatus {
        self.mux.status()
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    pub fn is_reconnecting(&self) -> bool {
        self.supervisor.target().is_some()
    }

    /// Re-reads the registry and rebuilds the summary view.
    pub async fn refresh(&mut self) -> Result<&SessionSummary, ClientError> {
        let listing = self.backend.list(&self.project_id).await?;
        self.apply_listing(listing);
        Ok(&self.summary)
    }

    /// Creates a session. It shows up in the summary only once the backend
    /// has acknowledged it. A tool name other than the default shell is
    /// typed into the session the first time it opens.
    pub async fn create_session(&mut self, name: &str) -> Result<Session, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidArgument("session name is empty".into()));
        }
        let session = self.backend.create(&self.project_id, name).await?;
        info!(target = "tidepool::lifecycle", session_id = %session.id, name, "session created");
        if name != DEFAULT_SHELL_NAME {
            self.pending_launch
                .insert(session.id.clone(), format!("{name}\n"));
        }
        if let Err(err) = self.refresh().await {
            warn!(target = "tidepool::lifecycle", error = %err, "refresh after create failed");
            if self.summary.insert(&session, self.selected.as_ref()) {
                self.queued.push_back(PanelEvent::SummaryChanged);
            }
        }
        Ok(session)
    }

    /// Creates a session and switches to it.
    pub async fn launch(&mut self, name: &str) -> Result<Session, ClientError> {
        let session = self.create_session(name).await?;
        self.switch_to(session.id.clone());
        Ok(session)
    }

    /// Selects `session_id` and reconnects to it, even if it is already the
    /// active one. Cancels any pending reconnect.
    pub fn switch_to(&mut self, session_id: SessionId) -> u64 {
        self.supervisor.cancel();
        self.fit.set_connected(false);
        self.select(Some(session_id.clone()));
        self.mux.switch_to(session_id)
    }

    /// Drops the active connection. The registry is not touched.
    pub fn detach(&mut self) {
        self.supervisor.cancel();
        self.fit.set_connected(false);
        self.mux.disconnect();
    }

    /// Closes a session. An active connection to it is torn down before the
    /// registry call. Closing the same id again is a no-op.
    pub async fn close_session(&mut self, session_id: &SessionId) -> Result<(), ClientError> {
        if self.closed.contains(session_id) {
            debug!(target = "tidepool::lifecycle", session_id = %session_id, "already closed");
            return Ok(());
        }
        if self.supervisor.is_tracking(session_id) {
            self.supervisor.cancel();
        }
        if self.mux.release(session_id) {
            self.fit.set_connected(false);
        }

        self.backend.close(session_id).await?;
        info!(target = "tidepool::lifecycle", session_id = %session_id, "session closed");
        if self.closed.len() == CLOSED_MEMORY {
            self.closed.pop_front();
        }
        self.closed.push_back(session_id.clone());
        self.pending_launch.remove(session_id);

        let was_selected = self.selected.as_ref() == Some(session_id);
        if was_selected {
            self.select(None);
        }
        match self.backend.list(&self.project_id).await {
            Ok(listing) => {
                let replacement = self.apply_listing(listing);
                if was_selected {
                    if let Some(next) = replacement {
                        self.switch_to(next);
                    }
                }
            }
            Err(err) => {
                warn!(target = "tidepool::lifecycle", error = %err, "refresh after close failed");
                if self.summary.remove(session_id) {
                    self.queued.push_back(PanelEvent::SummaryChanged);
                }
            }
        }
        Ok(())
    }

    /// Clears the backend scrollback and, for the selected session, the
    /// surface. The process is left alone.
    pub async fn clear_output(&mut self, session_id: &SessionId) -> Result<(), ClientError> {
        self.backend.clear(session_id).await?;
        if self.selected.as_ref() == Some(session_id) {
            self.queued.push_back(PanelEvent::ClearScreen);
        }
        Ok(())
    }

    pub async fn stop_session(&mut self, session_id: &SessionId) -> Result<Session, ClientError> {
        let session = self.backend.stop(session_id).await?;
        self.after_termination(&session).await;
        Ok(session)
    }

    pub async fn kill_session(&mut self, session_id: &SessionId) -> Result<Session, ClientError> {
        let session = self.backend.kill(session_id).await?;
        self.after_termination(&session).await;
        Ok(session)
    }

    pub fn send_input(&mut self, bytes: &[u8]) -> bool {
        self.mux.send_input(bytes)
    }

    /// The surface reported its settled geometry.
    pub fn observe_geometry(&mut self, geometry: ViewportGeometry) {
        // Without a connection the multiplexer only records the value for
        // the next initial announcement.
        let geometry = self.fit.observe(geometry).unwrap_or(geometry);
        self.mux.resize(geometry);
    }

    /// Layout may have changed; re-measure on the fallback schedule.
    pub fn request_refit(&mut self) {
        self.fit.request_refit(Instant::now());
    }

    /// Next thing for the surface. Cancel safe.
    pub async fn next_event(&mut self) -> PanelEvent {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return event;
            }
            let fit_deadline = self.fit.next_deadline();
            let retry_deadline = self.supervisor.next_deadline();
            tokio::select! {
                event = self.mux.next_event() => self.on_mux_event(event),
                Some((session_id, result)) = self.retry_rx.recv() => self.on_retry_check(session_id, result),
                _ = sleep_until(fit_deadline) => self.on_fit_deadline(),
                _ = sleep_until(retry_deadline) => self.on_retry_deadline(),
            }
        }
    }

    fn select(&mut self, session_id: Option<SessionId>) {
        self.selected = session_id;
        self.summary.select(self.selected.as_ref());
        self.queued.push_back(PanelEvent::SummaryChanged);
    }

    /// Rebuilds the summary and returns the backend's idea of the active tab.
    fn apply_listing(&mut self, listing: SessionListResponse) -> Option<SessionId> {
        let vanished = self
            .selected
            .as_ref()
            .filter(|id| !listing.sessions.iter().any(|s| &s.id == *id))
            .cloned();
        if let Some(gone) = vanished {
            debug!(target = "tidepool::lifecycle", session_id = %gone, "selected session vanished");
            if self.supervisor.is_tracking(&gone) {
                self.supervisor.cancel();
            }
            if self.mux.release(&gone) {
                self.fit.set_connected(false);
            }
            self.selected = None;
        }
        self.summary
            .recompute(&listing.sessions, self.selected.as_ref());
        self.queued.push_back(PanelEvent::SummaryChanged);
        self.reported_active = listing.active_session_id;
        self.reported_active.clone()
    }

    async fn after_termination(&mut self, session: &Session) {
        if self.summary.set_status(&session.id, session.status) {
            self.queued.push_back(PanelEvent::SummaryChanged);
        }
        if let Err(err) = self.refresh().await {
            warn!(target = "tidepool::lifecycle", error = %err, "refresh after termination failed");
        }
    }

    fn on_mux_event(&mut self, event: MuxEvent) {
        match event {
            MuxEvent::Opened {
                session_id,
                connection_id,
            } => {
                self.supervisor.on_opened(&session_id);
                self.fit.set_connected(true);
                self.fit.request_refit(Instant::now());
                if self.summary.set_status(&session_id, SessionStatus::Running) {
                    self.queued.push_back(PanelEvent::SummaryChanged);
                }
                if let Some(command) = self.pending_launch.remove(&session_id) {
                    debug!(target = "tidepool::lifecycle", session_id = %session_id, "launching tool");
                    self.mux.send_input(command.as_bytes());
                }
                self.queued.push_back(PanelEvent::Attached {
                    session_id,
                    connection_id,
                });
            }
            MuxEvent::OpenFailed {
                session_id, error, ..
            } => {
                if self.supervisor.is_tracking(&session_id) {
                    self.schedule_retry(&session_id);
                } else {
                    self.queued.push_back(PanelEvent::AttachFailed {
                        session_id,
                        error: error.to_string(),
                    });
                }
            }
            MuxEvent::Output { bytes, .. } => self.queued.push_back(PanelEvent::Output(bytes)),
            MuxEvent::Ended {
                session_id, ending, ..
            } => {
                self.fit.set_connected(false);
                self.queued.push_back(PanelEvent::Notice(ending.notice()));
                if self.summary.set_status(&session_id, SessionStatus::Stopped) {
                    self.queued.push_back(PanelEvent::SummaryChanged);
                }
                if ending.is_abnormal() {
                    self.schedule_retry(&session_id);
                }
            }
        }
    }

    fn schedule_retry(&mut self, session_id: &SessionId) {
        match self.supervisor.arm(session_id, Instant::now()) {
            Some(scheduled) => self.queued.push_back(PanelEvent::Notice(Notice::Reconnecting {
                attempt: scheduled.attempt,
                max_attempts: self.supervisor.policy().max_attempts,
                delay_secs: scheduled.delay.as_secs(),
            })),
            None if self.supervisor.policy().max_attempts > 0 => self
                .queued
                .push_back(PanelEvent::Notice(Notice::ReconnectAbandoned)),
            None => {}
        }
    }

    fn on_fit_deadline(&mut self) {
        if let Some(geometry) = self.fit.on_deadline(Instant::now(), self.probe.as_ref()) {
            self.mux.resize(geometry);
        }
    }

    /// Asks the registry whether the session is still worth reconnecting to.
    /// The answer arrives on `retry_rx` so `next_event` never awaits a
    /// request itself.
    fn on_retry_deadline(&mut self) {
        let Some(session_id) = self.supervisor.take_due(Instant::now()) else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let project_id = self.project_id.clone();
        let results = self.retry_tx.clone();
        tokio::spawn(async move {
            let result = backend.list(&project_id).await.map(|listing| {
                listing
                    .sessions
                    .iter()
                    .any(|s| s.id == session_id && s.is_running())
            });
            let _ = results.send((session_id, result));
        });
    }

    fn on_retry_check(&mut self, session_id: SessionId, result: Result<bool, ClientError>) {
        if !self.supervisor.is_tracking(&session_id) {
            return;
        }
        match result {
            Ok(true) => {
                info!(
                    target = "tidepool::reconnect",
                    session_id = %session_id,
                    attempt = self.supervisor.attempts(),
                    "reconnecting"
                );
                self.fit.set_connected(false);
                self.mux.switch_to(session_id);
            }
            Ok(false) => {
                info!(target = "tidepool::reconnect", session_id = %session_id, "session no longer running");
                self.supervisor.cancel();
                self.queued
                    .push_back(PanelEvent::Notice(Notice::ReconnectAbandoned));
            }
            Err(err) => {
                warn!(target = "tidepool::reconnect", session_id = %session_id, error = %err, "registry check failed");
                self.schedule_retry(&session_id);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
