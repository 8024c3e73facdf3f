use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{ProjectId, Session, SessionId, SessionListResponse, SessionStatus};

use super::SessionBackend;
use crate::error::ClientError;

/// In-process registry with the HTTP backend's semantics, for tests and
/// embedding. Can be flipped unreachable to exercise failure paths.
#[derive(Debug, Default)]
pub struct MemorySessionBackend {
    sessions: Mutex<Vec<Session>>,
    unavailable: AtomicBool,
    listing_fails: AtomicBool,
    close_calls: AtomicUsize,
    clear_calls: AtomicUsize,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes only `list` fail, leaving mutations reachable.
    pub fn set_listing_fails(&self, fails: bool) {
        self.listing_fails.store(fails, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> usize {
        self.clear_calls.load(Ordering::SeqCst)
    }

    /// Simulates the process behind a session exiting on its own.
    pub fn mark_stopped(&self, session_id: &SessionId) {
        if let Some(session) = self.sessions.lock().iter_mut().find(|s| &s.id == session_id) {
            session.status = SessionStatus::Stopped;
        }
    }

    pub fn snapshot(&self) -> Vec<Session> {
        self.sessions.lock().clone()
    }

    fn reachable(&self) -> Result<(), ClientError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClientError::BackendUnavailable("backend offline".into()));
        }
        Ok(())
    }

    fn set_status(&self, session_id: &SessionId, status: SessionStatus) -> Result<Session, ClientError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .iter_mut()
            .find(|s| &s.id == session_id)
            .ok_or_else(|| ClientError::BackendRejected {
                status: 404,
                message: format!("session {session_id} not found"),
            })?;
        session.status = status;
        Ok(session.clone())
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn create(&self, project_id: &ProjectId, name: &str) -> Result<Session, ClientError> {
        self.reachable()?;
        let session = Session::new(SessionId::generate(), project_id.clone(), name);
        self.sessions.lock().push(session.clone());
        Ok(session)
    }

    async fn list(&self, project_id: &ProjectId) -> Result<SessionListResponse, ClientError> {
        self.reachable()?;
        if self.listing_fails.load(Ordering::SeqCst) {
            return Err(ClientError::BackendUnavailable("listing failed".into()));
        }
        let sessions: Vec<Session> = self
            .sessions
            .lock()
            .iter()
            .filter(|s| &s.project_id == project_id)
            .cloned()
            .collect();
        let active_session_id = sessions.first().map(|s| s.id.clone());
        Ok(SessionListResponse {
            sessions,
            active_session_id,
        })
    }

    async fn close(&self, session_id: &SessionId) -> Result<(), ClientError> {
        self.reachable()?;
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().retain(|s| &s.id != session_id);
        Ok(())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), ClientError> {
        self.reachable()?;
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        if !self.sessions.lock().iter().any(|s| &s.id == session_id) {
            return Err(ClientError::BackendRejected {
                status: 404,
                message: format!("session {session_id} not found"),
            });
        }
        Ok(())
    }

    async fn stop(&self, session_id: &SessionId) -> Result<Session, ClientError> {
        self.reachable()?;
        self.set_status(session_id, SessionStatus::Stopped)
    }

    async fn kill(&self, session_id: &SessionId) -> Result<Session, ClientError> {
        self.reachable()?;
        self.set_status(session_id, SessionStatus::Stopped)
    }
}
