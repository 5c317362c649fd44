use thiserror::Error;

/// Failure taxonomy for backend calls.
///
/// `Duplicate` is load-bearing: join-type mutations hitting the backend's
/// uniqueness constraint are treated as already-applied, not as failures.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("duplicate row: {0}")]
    Duplicate(String),

    #[error("permission denied: {0}")]
    Denied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no active session")]
    NoSession,
}

impl BackendError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, BackendError::Duplicate(_))
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, BackendError::Denied(_))
    }
}

/// Error body shape the service returns on non-2xx responses.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Postgres unique-violation SQLSTATE, surfaced verbatim by the service.
pub(crate) const UNIQUE_VIOLATION: &str = "23505";
