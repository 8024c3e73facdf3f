//! Live PTY sessions keyed by id.
//!
//! Each session has one blocking reader thread. It appends output to the
//! scrollback and broadcasts it under the same lock, so an attaching client
//! sees every byte exactly once: the scrollback snapshot holds what came
//! before its subscription and the receiver holds what came after.

use std::io::{ErrorKind, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::{counter, decrement_gauge, increment_gauge};
use parking_lot::{Mutex, RwLock};
use tidepool_core::{ProjectId, Session, SessionId, SessionStatus, ViewportGeometry};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::ServerError;
use crate::pty::{Command, PtyProcess, PtyReader};
use crate::scrollback::Scrollback;

const READ_CHUNK: usize = 4096;
const OUTPUT_CHANNEL_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Output(Arc<[u8]>),
    Exited,
}

/// A new subscriber's view of a session.
pub struct Attachment {
    /// Scrollback captured at the moment of subscription.
    pub replay: Vec<u8>,
    pub events: broadcast::Receiver<StreamEvent>,
    /// The process had already exited; no `Exited` event will follow.
    pub exited: bool,
}

struct SessionState {
    seq: u64,
    info: RwLock<Session>,
    process: PtyProcess,
    scrollback: Mutex<Scrollback>,
    events: broadcast::Sender<StreamEvent>,
    exited: AtomicBool,
    write_lock: tokio::sync::Mutex<()>,
}

impl SessionState {
    fn snapshot(&self) -> Session {
        self.info.read().clone()
    }

    fn set_status(&self, status: SessionStatus) {
        self.info.write().status = status;
    }

    fn is_running(&self) -> bool {
        self.info.read().is_running()
    }

    fn record_output(&self, chunk: &[u8]) {
        let mut scrollback = self.scrollback.lock();
        scrollback.push(chunk);
        let _ = self.events.send(StreamEvent::Output(Arc::from(chunk)));
    }

    fn mark_exited(&self) {
        let _scrollback = self.scrollback.lock();
        self.set_status(SessionStatus::Stopped);
        self.exited.store(true, Ordering::SeqCst);
        self.process.reap();
        let _ = self.events.send(StreamEvent::Exited);
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    sessions: DashMap<SessionId, Arc<SessionState>>,
    config: SessionConfig,
    next_seq: AtomicU64,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                sessions: DashMap::new(),
                config,
                next_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Spawns the configured shell in the project's workspace directory.
    /// `name` is a label only.
    pub fn create(&self, project_id: &ProjectId, name: &str) -> Result<Session, ServerError> {
        if !project_id.is_path_safe() {
            return Err(ServerError::InvalidProject(project_id.as_str().to_string()));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(ServerError::EmptyName);
        }

        let cwd = self.inner.config.workspace_dir.join(project_id.as_str());
        std::fs::create_dir_all(&cwd).map_err(ServerError::Workspace)?;

        let command = Command::shell(self.inner.config.shell.clone()).cwd(cwd);
        let (process, reader) = PtyProcess::spawn(&command, ViewportGeometry::default())?;
        let session = Session::new(SessionId::generate(), project_id.clone(), name);
        let (events, _) = broadcast::channel(OUTPUT_CHANNEL_DEPTH);
        let state = Arc::new(SessionState {
            seq: self.inner.next_seq.fetch_add(1, Ordering::Relaxed),
            info: RwLock::new(session.clone()),
            process,
            scrollback: Mutex::new(Scrollback::new(self.inner.config.scrollback_bytes)),
            events,
            exited: AtomicBool::new(false),
            write_lock: tokio::sync::Mutex::new(()),
        });

        spawn_reader(session.id.clone(), Arc::clone(&state), reader);
        self.inner.sessions.insert(session.id.clone(), state);
        counter!("tidepool_sessions_created_total", 1);
        increment_gauge!("tidepool_sessions_active", 1.0);
        info!(
            session_id = %session.id,
            project_id = %project_id,
            name,
            pid = ?self.pid(&session.id),
            "session created"
        );
        Ok(session)
    }

    /// Sessions of one project in creation order.
    pub fn list(&self, project_id: &ProjectId) -> Vec<Session> {
        let mut sessions: Vec<(u64, Session)> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| &entry.value().info.read().project_id == project_id)
            .map(|entry| (entry.value().seq, entry.value().snapshot()))
            .collect();
        sessions.sort_by_key(|(seq, _)| *seq);
        sessions.into_iter().map(|(_, session)| session).collect()
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.state(session_id).map(|state| state.snapshot())
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    fn pid(&self, session_id: &SessionId) -> Option<u32> {
        self.state(session_id).and_then(|state| state.process.pid())
    }

    /// Subscribes to live output and captures the replay buffer atomically.
    pub fn attach(&self, session_id: &SessionId) -> Option<Attachment> {
        let state = self.state(session_id)?;
        let scrollback = state.scrollback.lock();
        let events = state.events.subscribe();
        Some(Attachment {
            replay: scrollback.snapshot(),
            events,
            exited: state.exited.load(Ordering::SeqCst),
        })
    }

    /// Writes input to the session. Concurrent writers are serialised so
    /// one client's keystrokes never interleave with another's. Input for a
    /// stopped session is dropped.
    pub async fn write(&self, session_id: &SessionId, bytes: &[u8]) -> Result<bool, ServerError> {
        let state = self
            .state(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.clone()))?;
        if !state.is_running() {
            return Ok(false);
        }
        let _guard = state.write_lock.lock().await;
        state.process.write(bytes)?;
        Ok(true)
    }

    pub fn resize(&self, session_id: &SessionId, geometry: ViewportGeometry) -> Result<bool, ServerError> {
        let state = self
            .state(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.clone()))?;
        if !state.is_running() {
            return Ok(false);
        }
        state.process.resize(geometry)?;
        debug!(session_id = %session_id, %geometry, "pty resized");
        Ok(true)
    }

    /// Clears the replay buffer. The process keeps running.
    pub fn clear(&self, session_id: &SessionId) -> Result<(), ServerError> {
        let state = self
            .state(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.clone()))?;
        state.scrollback.lock().clear();
        Ok(())
    }

    /// Sends SIGTERM and marks the session stopped. The session stays
    /// listed until removed.
    pub fn stop(&self, session_id: &SessionId) -> Result<Session, ServerError> {
        let state = self
            .state(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.clone()))?;
        if state.is_running() {
            state.process.terminate();
            state.set_status(SessionStatus::Stopped);
            info!(session_id = %session_id, "session stopped");
        }
        Ok(state.snapshot())
    }

    pub fn kill(&self, session_id: &SessionId) -> Result<Session, ServerError> {
        let state = self
            .state(session_id)
            .ok_or_else(|| ServerError::SessionNotFound(session_id.clone()))?;
        state.process.kill();
        state.set_status(SessionStatus::Stopped);
        info!(session_id = %session_id, "session killed");
        Ok(state.snapshot())
    }

    /// Kills the process and forgets the session. `false` if it was unknown.
    pub fn remove(&self, session_id: &SessionId) -> bool {
        let Some((_, state)) = self.inner.sessions.remove(session_id) else {
            return false;
        };
        state.process.kill();
        state.set_status(SessionStatus::Stopped);
        counter!("tidepool_sessions_closed_total", 1);
        decrement_gauge!("tidepool_sessions_active", 1.0);
        info!(session_id = %session_id, "session removed");
        true
    }

    /// Removes every session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            self.remove(&id);
        }
    }

    fn state(&self, session_id: &SessionId) -> Option<Arc<SessionState>> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }
}

fn spawn_reader(session_id: SessionId, state: Arc<SessionState>, mut reader: PtyReader) {
    let spawned = std::thread::Builder::new()
        .name(format!("pty-reader-{}", short(&session_id)))
        .spawn(move || {
            let mut buffer = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => state.record_output(&buffer[..n]),
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        // EIO is how Linux reports a closed slave side.
                        debug!(session_id = %session_id, error = %err, "pty read ended");
                        break;
                    }
                }
            }
            state.mark_exited();
            info!(session_id = %session_id, "session process exited");
        });
    if let Err(err) = spawned {
        warn!(error = %err, "failed to spawn pty reader thread");
    }
}

fn short(session_id: &SessionId) -> &str {
    let id = session_id.as_str();
    id.get(..8).unwrap_or(id)
}
