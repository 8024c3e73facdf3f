use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tidepool_core::{
    CreateSessionRequest, ErrorBody, ProjectId, Session, SessionId, SessionListResponse,
};
use tracing::debug;
use url::Url;

use super::SessionBackend;
use crate::error::ClientError;

/// [`SessionBackend`] over the backend's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSessionBackend {
    client: Client,
    base_url: Url,
}

impl HttpSessionBackend {
    pub fn new(server: &str) -> Result<Self, ClientError> {
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };
        // localhost may resolve to ::1 first while the backend binds IPv4 only
        let server = server.replacen("://localhost", "://127.0.0.1", 1);
        let base_url = Url::parse(&server)
            .map_err(|err| ClientError::InvalidArgument(format!("server url {server}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidArgument(format!("server url {server}")));
        }

        // Short timeouts and no proxy so an absent local backend fails fast.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(Duration::from_secs(4))
            .no_proxy()
            .build()
            .map_err(|err| ClientError::InvalidArgument(format!("http client: {err}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let response = Self::check(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ClientError::BackendUnavailable(format!("malformed response: {err}")))
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|body| body.message)
            .unwrap_or(body);
        if status.is_server_error() {
            return Err(ClientError::BackendUnavailable(format!("{status}: {message}")));
        }
        Err(ClientError::BackendRejected {
            status: status.as_u16(),
            message,
        })
    }
}

fn unreachable(err: reqwest::Error) -> ClientError {
    ClientError::BackendUnavailable(err.to_string())
}

#[async_trait]
impl SessionBackend for HttpSessionBackend {
    async fn create(&self, project_id: &ProjectId, name: &str) -> Result<Session, ClientError> {
        let request = CreateSessionRequest {
            project_id: project_id.clone(),
            name: name.to_string(),
        };
        let response = self
            .client
            .post(self.endpoint(&["terminal", "create"]))
            .json(&request)
            .send()
            .await
            .map_err(unreachable)?;
        let session: Session = Self::json(response).await?;
        debug!(target = "tidepool::registry", session_id = %session.id, name, "session created");
        Ok(session)
    }

    async fn list(&self, project_id: &ProjectId) -> Result<SessionListResponse, ClientError> {
        let response = self
            .client
            .get(self.endpoint(&["terminal", "sessions", project_id.as_str()]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::json(response).await
    }

    async fn close(&self, session_id: &SessionId) -> Result<(), ClientError> {
        let response = self
            .client
            .delete(self.endpoint(&["terminal", session_id.as_str()]))
            .send()
            .await
            .map_err(unreachable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), ClientError> {
        let response = self
            .client
            .post(self.endpoint(&["terminal", session_id.as_str(), "clear"]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::check(response).await.map(|_| ())
    }

    async fn stop(&self, session_id: &SessionId) -> Result<Session, ClientError> {
        let response = self
            .client
            .post(self.endpoint(&["terminal", session_id.as_str(), "stop"]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::json(response).await
    }

    async fn kill(&self, session_id: &SessionId) -> Result<Session, ClientError> {
        let response = self
            .client
            .post(self.endpoint(&["terminal", session_id.as_str(), "kill"]))
            .send()
            .await
            .map_err(unreachable)?;
        Self::json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn base_url_is_normalised() {
        let backend = HttpSessionBackend::new("localhost:19080").expect("backend");
        assert_eq!(backend.base_url().as_str(), "http://127.0.0.1:19080/");
        let backend = HttpSessionBackend::new("https://tide.example.com/api/").expect("backend");
        assert_eq!(
            backend.endpoint(&["terminal", "s 1", "clear"]).as_str(),
            "https://tide.example.com/api/terminal/s%201/clear"
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn unreachable_backend_maps_to_unavailable() {
        // Port 9 (discard) is closed on any sane test host.
        let backend = HttpSessionBackend::new("http://127.0.0.1:9").expect("backend");
        let err = backend
            .list(&ProjectId::from("p1"))
            .await
            .expect_err("nothing listens there");
        assert!(err.is_unavailable(), "unexpected error: {err}");
    }
}
