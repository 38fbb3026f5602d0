//! Translation of backend error shapes into flat user-facing strings.

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::error::{ApiError, ErrorKind};

pub const SESSION_EXPIRED: &str = "Session expired. Please login again.";
pub const LOGIN_FAILED: &str = "Unable to sign in. Please try again.";
pub const MISSING_TOKENS: &str = "The server did not return any tokens.";
pub const REGISTER_FAILED: &str = "Unable to create the account. Please try again.";
pub const IMAGE_TOO_LARGE: &str = "The image is too large. Please choose an image smaller than 5MB.";
pub const INVALID_DATA: &str = "Invalid data. Please check your input and try again.";
pub const SERVER_TROUBLE: &str = "The server is having problems. Please try again later.";
pub const NETWORK_UNREACHABLE: &str =
    "Unable to reach the server. Please check your network connection.";
pub const PROFILE_UPDATE_FAILED: &str = "Something went wrong while updating your profile.";

/// Failure returned by every [`AuthSession`](super::AuthSession) operation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct AuthFailure {
    pub message: String,
    pub kind: ErrorKind,
    /// Backend body when there was one, otherwise the raw error text.
    pub details: Option<Value>,
}

impl AuthFailure {
    pub fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        AuthFailure {
            message: message.into(),
            kind,
            details: None,
        }
    }

    fn from_api(message: impl Into<String>, err: &ApiError) -> Self {
        AuthFailure {
            message: message.into(),
            kind: err.kind(),
            details: Some(
                err.body()
                    .cloned()
                    .unwrap_or_else(|| Value::String(err.to_string())),
            ),
        }
    }

    pub fn is_session_expired(&self) -> bool {
        self.kind == ErrorKind::SessionExpired
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn field_message(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(field_message).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        Value::Object(_) => flatten_field_errors(value),
        _ => None,
    }
}

/// `{"username": ["Required."], "non_field_errors": ["Bad pair."]}` becomes
/// `"Bad pair.\nusername: Required."`.
pub fn flatten_field_errors(body: &Value) -> Option<String> {
    let map = body.as_object()?;
    let mut general = Vec::new();
    let mut fields = Vec::new();
    for (key, value) in map {
        let Some(message) = field_message(value) else {
            continue;
        };
        match key.as_str() {
            "non_field_errors" | "detail" | "message" | "error" => general.push(message),
            _ => fields.push(format!("{key}: {message}")),
        }
    }
    general.extend(fields);
    (!general.is_empty()).then(|| general.join("\n"))
}

fn backend_message(err: &ApiError) -> Option<String> {
    let body = err.body()?;
    non_empty_str(body.get("detail"))
        .or_else(|| non_empty_str(body.get("message")))
        .or_else(|| flatten_field_errors(body))
}

pub(crate) fn login_failure(err: &ApiError) -> AuthFailure {
    if err.is_session_expired() {
        return AuthFailure::from_api(SESSION_EXPIRED, err);
    }
    let message = backend_message(err).unwrap_or_else(|| match err {
        ApiError::Network { .. } => NETWORK_UNREACHABLE.to_string(),
        ApiError::Status { .. } => LOGIN_FAILED.to_string(),
        other => other.to_string(),
    });
    AuthFailure::from_api(message, err)
}

pub(crate) fn register_failure(err: &ApiError) -> AuthFailure {
    let message = backend_message(err).unwrap_or_else(|| match err.kind() {
        ErrorKind::Network => NETWORK_UNREACHABLE.to_string(),
        ErrorKind::Server => SERVER_TROUBLE.to_string(),
        _ => REGISTER_FAILED.to_string(),
    });
    AuthFailure::from_api(message, err)
}

pub(crate) fn profile_update_failure(err: &ApiError) -> AuthFailure {
    let message = match err {
        ApiError::Status { status, .. } if *status == StatusCode::PAYLOAD_TOO_LARGE => {
            IMAGE_TOO_LARGE.to_string()
        }
        ApiError::Status { status, .. } if *status == StatusCode::BAD_REQUEST => {
            backend_message(err).unwrap_or_else(|| INVALID_DATA.to_string())
        }
        ApiError::Status { status, .. } if status.is_server_error() => SERVER_TROUBLE.to_string(),
        ApiError::Network { .. } => NETWORK_UNREACHABLE.to_string(),
        ApiError::SessionExpired { .. } => SESSION_EXPIRED.to_string(),
        _ => PROFILE_UPDATE_FAILED.to_string(),
    };
    AuthFailure::from_api(message, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(code: u16, body: Value) -> ApiError {
        ApiError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            text: body.to_string(),
            body: Some(body),
        }
    }

    #[test]
    fn field_errors_flatten_to_lines() {
        let body = json!({
            "username": ["This field is required."],
            "non_field_errors": ["Unable to log in with provided credentials."],
            "password": ["Too short.", "Too common."]
        });
        let flat = flatten_field_errors(&body).unwrap();
        let lines: Vec<&str> = flat.lines().collect();
        assert_eq!(lines[0], "Unable to log in with provided credentials.");
        assert!(lines.contains(&"username: This field is required."));
        assert!(lines.contains(&"password: Too short. Too common."));
    }

    #[test]
    fn login_prefers_detail_then_message() {
        let err = status(401, json!({ "detail": "No active account found", "message": "x" }));
        assert_eq!(login_failure(&err).message, "No active account found");

        let err = status(400, json!({ "message": "Wrong password" }));
        assert_eq!(login_failure(&err).message, "Wrong password");

        let err = status(500, json!("boom"));
        assert_eq!(login_failure(&err).message, LOGIN_FAILED);
    }

    #[test]
    fn profile_update_messages_by_cause() {
        assert_eq!(profile_update_failure(&status(413, Value::Null)).message, IMAGE_TOO_LARGE);
        assert_eq!(profile_update_failure(&status(400, json!({}))).message, INVALID_DATA);
        assert_eq!(
            profile_update_failure(&status(400, json!({ "phone": ["Invalid phone."] }))).message,
            "phone: Invalid phone."
        );
        assert_eq!(profile_update_failure(&status(503, Value::Null)).message, SERVER_TROUBLE);
        assert_eq!(profile_update_failure(&status(404, Value::Null)).message, PROFILE_UPDATE_FAILED);

        let network = ApiError::Network {
            message: "connection refused".into(),
            timeout: false,
        };
        let failure = profile_update_failure(&network);
        assert_eq!(failure.message, NETWORK_UNREACHABLE);
        assert_eq!(failure.kind, ErrorKind::Network);
        assert_eq!(failure.details, Some(Value::String("network error: connection refused".into())));
    }
}
