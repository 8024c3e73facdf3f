//! Client side of the session registry.

use async_trait::async_trait;
use tidepool_core::{ProjectId, Session, SessionId, SessionListResponse};

use crate::error::ClientError;

pub mod http;
pub mod memory;

pub use http::HttpSessionBackend;
pub use memory::MemorySessionBackend;

/// Request/response access to the backend that owns sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn create(&self, project_id: &ProjectId, name: &str) -> Result<Session, ClientError>;

    async fn list(&self, project_id: &ProjectId) -> Result<SessionListResponse, ClientError>;

    /// Succeeds for ids the backend no longer knows.
    async fn close(&self, session_id: &SessionId) -> Result<(), ClientError>;

    async fn clear(&self, session_id: &SessionId) -> Result<(), ClientError>;

    /// Asks the process to terminate.
    async fn stop(&self, session_id: &SessionId) -> Result<Session, ClientError>;

    /// Terminates the process unconditionally.
    async fn kill(&self, session_id: &SessionId) -> Result<Session, ClientError>;
}
