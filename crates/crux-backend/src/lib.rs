pub mod auth;
pub mod error;
pub mod rows;
pub mod rpc;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::warn;

use crate::auth::SessionStore;
use crate::error::{ApiErrorBody, BackendError, UNIQUE_VIOLATION};

pub use crate::auth::AuthState;
pub use crate::error::BackendError as Error;

/// HTTP client for the hosted backend service.
///
/// Cheap to clone; all clones share one connection pool and one session
/// store, so a sign-in observed by any clone is visible to all of them.
#[derive(Clone)]
pub struct Backend {
    pub(crate) http: reqwest::Client,
    base_url: Arc<str>,
    pub(crate) sessions: Arc<SessionStore>,
}

impl Backend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url: base.into(),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the current access token, if a session exists.
    pub(crate) fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.sessions.access_token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Map a non-success response onto the error taxonomy. A 401 also drops
    /// the local session so the auth-state stream flips to signed-out.
    pub(crate) async fn fail(&self, resp: reqwest::Response) -> BackendError {
        let status = resp.status();
        let body: ApiErrorBody = resp.json().await.unwrap_or(ApiErrorBody {
            code: None,
            message: None,
        });
        let message = body.message.unwrap_or_else(|| status.to_string());

        if status == StatusCode::UNAUTHORIZED {
            warn!("session rejected by backend, signing out locally");
            self.sessions.clear();
        }

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BackendError::Denied(message),
            StatusCode::NOT_FOUND => BackendError::NotFound(message),
            StatusCode::CONFLICT => BackendError::Duplicate(message),
            _ if body.code.as_deref() == Some(UNIQUE_VIOLATION) => {
                BackendError::Duplicate(message)
            }
            _ => BackendError::Api { status: status.as_u16(), message },
        }
    }
}

/// The slice of the backend the sync layer depends on. Kept narrow so tests
/// can stand in an in-memory implementation.
#[async_trait]
pub trait DataPlane: Send + Sync {
    async fn fetch_rows(
        &self,
        topic: &str,
        filter: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, BackendError>;

    async fn upsert_row(
        &self,
        topic: &str,
        row: serde_json::Value,
    ) -> Result<(), BackendError>;

    async fn delete_rows(&self, topic: &str, filter: &str) -> Result<(), BackendError>;
}

#[async_trait]
impl DataPlane for Backend {
    async fn fetch_rows(
        &self,
        topic: &str,
        filter: Option<&str>,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let mut select = self.from(topic);
        if let Some(f) = filter {
            select = select.raw_filter(f);
        }
        select.fetch().await
    }

    async fn upsert_row(
        &self,
        topic: &str,
        row: serde_json::Value,
    ) -> Result<(), BackendError> {
        self.upsert(topic, &row).await.map(|_: serde_json::Value| ())
    }

    async fn delete_rows(&self, topic: &str, filter: &str) -> Result<(), BackendError> {
        self.delete(topic, filter).await
    }
}
