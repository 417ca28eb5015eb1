//! HTTP access to the broker's session and channel endpoints.
//!
//! The client talks to the server through two narrow traits so identity
//! and loading logic can be exercised against in-process fakes:
//!
//! - [`SessionApi`] -- issue and validate session tokens
//! - [`ChunkSource`] -- fetch one page of a session's items
//!
//! [`HttpApi`] implements both over `reqwest`.

use async_trait::async_trait;
use guidesync_types::{
    Channel, ChunkResponse, CreateSessionResponse, SessionToken, ValidateSessionResponse,
};
use tracing::debug;

use crate::error::ClientError;

/// Issues and validates session tokens.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Ask the server for a new session token.
    async fn create_session(&self) -> Result<SessionToken, ClientError>;

    /// Ask the server whether `token` is still valid.
    async fn validate_session(&self, token: &SessionToken) -> Result<bool, ClientError>;
}

/// Serves paginated items for a session.
#[async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    /// Item type on each page.
    type Item: Send;

    /// Fetch one-based `page` with `limit` items per page.
    async fn fetch_chunk(
        &self,
        token: &SessionToken,
        page: usize,
        limit: usize,
    ) -> Result<ChunkResponse<Self::Item>, ClientError>;
}

/// Broker client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    /// Create a client for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing `reqwest` client.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    /// Broker base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying HTTP client.
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// URL of the event stream for `token`.
    pub fn events_url(&self, token: &SessionToken) -> String {
        format!("{}/api/sessions/{token}/events", self.base_url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("server returned {status}: {body}");
            return Err(if status.is_server_error() {
                ClientError::Transport(message)
            } else {
                ClientError::Session(message)
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn create_session(&self) -> Result<SessionToken, ClientError> {
        let url = format!("{}/api/sessions", self.base_url);
        let body: CreateSessionResponse = self.get_json(self.client.post(&url)).await?;
        let token = SessionToken::parse(&body.session_id)?;
        debug!(%token, "Session token issued by server");
        Ok(token)
    }

    async fn validate_session(&self, token: &SessionToken) -> Result<bool, ClientError> {
        let url = format!("{}/api/sessions/{token}/validate", self.base_url);
        let body: ValidateSessionResponse = self.get_json(self.client.get(&url)).await?;
        Ok(body.valid)
    }
}

#[async_trait]
impl ChunkSource for HttpApi {
    type Item = Channel;

    async fn fetch_chunk(
        &self,
        token: &SessionToken,
        page: usize,
        limit: usize,
    ) -> Result<ChunkResponse<Channel>, ClientError> {
        let url = format!("{}/api/sessions/{token}/channels", self.base_url);
        let request = self
            .client
            .get(&url)
            .query(&[("page", page), ("limit", limit)]);
        self.get_json(request).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn create_session_parses_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sessionId": "s-1"})))
            .mount(&server)
            .await;

        let api = HttpApi::new(server.uri());
        assert_eq!(api.create_session().await.unwrap().as_str(), "s-1");
    }

    #[tokio::test]
    async fn create_session_rejects_placeholder_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"session_id": "null"})))
            .mount(&server)
            .await;

        let api = HttpApi::new(server.uri());
        assert!(matches!(
            api.create_session().await,
            Err(ClientError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn client_error_status_is_session_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/abc/validate"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .mount(&server)
            .await;

        let api = HttpApi::new(server.uri());
        let token = SessionToken::parse("abc").unwrap();
        assert!(matches!(
            api.validate_session(&token).await,
            Err(ClientError::Session(_))
        ));
    }

    #[tokio::test]
    async fn server_error_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/abc/validate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let api = HttpApi::new(server.uri());
        let token = SessionToken::parse("abc").unwrap();
        assert!(matches!(
            api.validate_session(&token).await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn fetch_chunk_sends_page_and_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/sessions/abc/channels"))
            .and(query_param("page", "2"))
            .and(query_param("limit", "500"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "channels": [{"id": "c1", "name": "One", "group-title": "News"}],
                "pagination": {"total": 501, "page": 2, "limit": 500, "total_pages": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpApi::new(server.uri());
        let token = SessionToken::parse("abc").unwrap();
        let chunk = api.fetch_chunk(&token, 2, 500).await.unwrap();
        assert_eq!(chunk.items.len(), 1);
        assert_eq!(chunk.items.first().unwrap().group.as_deref(), Some("News"));
        assert_eq!(chunk.pagination.total_items, 501);
        assert!(chunk.groups.is_none());
    }

    #[test]
    fn events_url_is_per_session() {
        let api = HttpApi::new("http://localhost:8090/");
        let token = SessionToken::parse("abc").unwrap();
        assert_eq!(
            api.events_url(&token),
            "http://localhost:8090/api/sessions/abc/events"
        );
    }
}
