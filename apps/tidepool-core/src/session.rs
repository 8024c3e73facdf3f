use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Name used when a session is created without naming a tool.
pub const DEFAULT_SHELL_NAME: &str = "bash";

/// Opaque session identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Fresh identifier in the backend's format (UUID v4 text).
    pub fn generate() -> Self {
        SessionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        SessionId(value.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        SessionId(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Project that owns a set of sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A project id doubles as a directory name on the backend, so anything
    /// that could escape the workspace root is refused.
    pub fn is_path_safe(&self) -> bool {
        let id = self.0.as_str();
        !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0'])
            && !id.starts_with('.')
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        ProjectId(value.to_owned())
    }
}

impl From<String> for ProjectId {
    fn from(value: String) -> Self {
        ProjectId(value)
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Stopped,
}

impl SessionStatus {
    pub fn is_running(self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => f.write_str("running"),
            SessionStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// One remote shell instance as reported by the session registry.
///
/// Selection (`is_active`) is deliberately absent: it is client state and is
/// tracked by the client's summary view, never by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub project_id: ProjectId,
    #[serde(rename = "name")]
    pub display_name: String,
    pub status: SessionStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Session {
    pub fn new(id: SessionId, project_id: ProjectId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            project_id,
            display_name: display_name.into(),
            status: SessionStatus::Running,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}
