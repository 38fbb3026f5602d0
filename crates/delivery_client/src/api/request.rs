use std::path::PathBuf;

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// Token pinned for a single attempt, read by the auth middleware instead of
/// the token store.
#[derive(Debug, Clone)]
pub(crate) struct PinnedBearer(pub Option<String>);

/// A file to upload, read from disk on every attempt so replays can rebuild
/// the multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartPayload {
    pub fields: Vec<(String, String)>,
    pub files: Vec<FilePart>,
}

impl MultipartPayload {
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, file: FilePart) -> Self {
        self.files.push(file);
        self
    }

    pub(crate) async fn to_form(&self) -> Result<Form, ApiError> {
        let mut form = Form::new();
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        for file in &self.files {
            let bytes = tokio::fs::read(&file.path).await.map_err(|e| {
                ApiError::InvalidRequest(format!("cannot read {}: {e}", file.path.display()))
            })?;
            let part = Part::bytes(bytes)
                .file_name(file.file_name.clone())
                .mime_str(&file.mime)
                .map_err(|e| ApiError::InvalidRequest(format!("bad mime {}: {e}", file.mime)))?;
            form = form.part(file.field.clone(), part);
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(MultipartPayload),
}

/// Description of a backend call that can be rebuilt for each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
    /// Replay marker: a 401 on this request is not refreshed again.
    pub(crate) retried: bool,
    /// Marker for the unauthenticated replay of a public request.
    pub(crate) no_auth_retry: bool,
    pub(crate) bearer: Option<String>,
    pub(crate) timeout: Option<std::time::Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            headers: Vec::new(),
            retried: false,
            no_auth_retry: false,
            bearer: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("cannot encode body: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn json_value(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, payload: MultipartPayload) -> Self {
        self.body = RequestBody::Multipart(payload);
        self
    }

    /// Extra header sent on every attempt. A multipart `Content-Type` set here
    /// gives way to the one carrying the generated boundary.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sends with this token instead of the stored one.
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// A 401 on this request is returned as-is instead of triggering a refresh.
    pub fn without_refresh(mut self) -> Self {
        self.retried = true;
        self
    }

    pub fn timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Copy used to replay after a refresh, pinned to `token`.
    pub(crate) fn replay_with(&self, token: String) -> Self {
        let mut replay = self.clone();
        replay.retried = true;
        replay.bearer = Some(token);
        replay
    }

    /// Copy used to replay a public request without any credentials.
    pub(crate) fn replay_without_auth(&self) -> Self {
        let mut replay = self.clone();
        replay.retried = true;
        replay.no_auth_retry = true;
        replay.bearer = None;
        replay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_are_marked() {
        let request = ApiRequest::get("/orders/").query("page", 2);
        assert!(!request.is_retried());

        let replay = request.replay_with("new".into());
        assert!(replay.is_retried());
        assert_eq!(replay.bearer.as_deref(), Some("new"));
        assert_eq!(replay.query, vec![("page".to_string(), "2".to_string())]);

        let bare = replay.replay_without_auth();
        assert!(bare.no_auth_retry);
        assert!(bare.bearer.is_none());
    }

    #[tokio::test]
    async fn missing_upload_file_is_invalid_request() {
        let payload = MultipartPayload::default().file(FilePart {
            field: "avatar".into(),
            path: PathBuf::from("/definitely/not/here.png"),
            file_name: "avatar.png".into(),
            mime: "image/png".into(),
        });
        let err = payload.to_form().await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }
}
