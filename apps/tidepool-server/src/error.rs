use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tidepool_core::{ErrorBody, SessionId};

use crate::pty::PtyError;

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("invalid project id {0:?}")]
    InvalidProject(String),
    #[error("session name is empty")]
    EmptyName,
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error(transparent)]
    Pty(#[from] PtyError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidProject(_) | ServerError::EmptyName => StatusCode::BAD_REQUEST,
            ServerError::Workspace(_) | ServerError::Pty(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn maps_to_http_status() {
        assert_eq!(
            ServerError::SessionNotFound(SessionId::from("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServerError::InvalidProject("../etc".into()).status(),
            StatusCode::BAD_REQUEST
        );
        let pty = ServerError::from(PtyError::Open("no ptys".into()));
        assert_eq!(pty.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
