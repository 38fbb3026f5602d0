use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Coarse classification used by callers to pick user-facing copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Validation,
    Unauthorized,
    SessionExpired,
    PayloadTooLarge,
    Server,
    Other,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Why a refresh exchange did not produce a new access token.
///
/// Cloned into every parked request of the burst, so it only carries strings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("no refresh token found")]
    MissingRefreshToken,

    #[error("token refresh rejected: HTTP {status}")]
    Rejected { status: u16, body: String },

    #[error("token refresh response did not contain an access token")]
    MissingAccessToken,

    #[error("network error during token refresh: {0}")]
    Network(String),

    #[error("session storage failed during token refresh: {0}")]
    Storage(String),

    #[error("token refresh was abandoned")]
    Abandoned,

    /// The session was cleared or replaced while the exchange was in flight.
    #[error("session was reset during token refresh")]
    SessionReset,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// No response reached the client.
    #[error("network error: {message}")]
    Network { message: String, timeout: bool },

    /// The backend answered with a non-success status.
    #[error("HTTP {status}: {text}")]
    Status {
        status: StatusCode,
        text: String,
        body: Option<Value>,
    },

    /// The refresh exchange failed; the caller has to log in again.
    #[error("Session expired. Please login again.")]
    SessionExpired { cause: RefreshError },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub(crate) fn network(err: &reqwest::Error) -> Self {
        ApiError::Network {
            message: err.to_string(),
            timeout: err.is_timeout(),
        }
    }

    pub(crate) fn from_middleware(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(e) => ApiError::network(&e),
            reqwest_middleware::Error::Middleware(e) => match e.downcast::<StorageError>() {
                Ok(storage) => ApiError::Storage(storage),
                Err(other) => ApiError::Network {
                    message: other.to_string(),
                    timeout: false,
                },
            },
        }
    }

    /// Builds a status error, keeping the body both raw and parsed.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<Value>(&text).ok();
        ApiError::Status { status, text, body }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            ApiError::Status { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ApiError::SessionExpired { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::SessionExpired { .. } => ErrorKind::SessionExpired,
            ApiError::Status { status, .. } => match *status {
                StatusCode::UNAUTHORIZED => ErrorKind::Unauthorized,
                StatusCode::PAYLOAD_TOO_LARGE => ErrorKind::PayloadTooLarge,
                s if s.is_server_error() => ErrorKind::Server,
                s if s.is_client_error() => ErrorKind::Validation,
                _ => ErrorKind::Other,
            },
            _ => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
