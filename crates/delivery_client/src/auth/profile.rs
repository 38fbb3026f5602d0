use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::api::{ApiRequest, FilePart, MultipartPayload};

pub const PROFILE_PATH: &str = "auth/profile/";

/// Text fields to update plus an optional avatar reference (local file path,
/// `file://` URI, or an already hosted URL).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub fields: Map<String, Value>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn avatar(mut self, uri: impl Into<String>) -> Self {
        self.avatar = Some(uri.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvatarSource<'a> {
    /// Not uploaded yet; needs a multipart submission.
    Local(PathBuf),
    /// Already hosted; never sent back.
    Remote(&'a str),
}

pub fn classify_avatar(uri: &str) -> AvatarSource<'_> {
    if let Some(path) = uri.strip_prefix("file://") {
        return AvatarSource::Local(PathBuf::from(path));
    }
    if uri.starts_with("http") {
        AvatarSource::Remote(uri)
    } else {
        AvatarSource::Local(PathBuf::from(uri))
    }
}

fn image_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .then(|| ext.to_ascii_lowercase())
}

fn avatar_part(path: PathBuf, stamp_millis: i64) -> FilePart {
    let ext = image_extension(&path);
    let mime = match ext.as_deref() {
        Some("jpg") | None => "image/jpeg".to_string(),
        Some(ext) => format!("image/{ext}"),
    };
    FilePart {
        field: "avatar".to_string(),
        file_name: format!("avatar_{}.{}", stamp_millis, ext.as_deref().unwrap_or("jpg")),
        path,
        mime,
    }
}

fn form_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(_) | Value::Array(_) => Some(value.to_string()),
        other => Some(other.to_string()),
    }
}

/// JSON for text-only updates, multipart when a local avatar is attached.
pub(crate) fn build_update_request(update: &ProfileUpdate, stamp_millis: i64) -> ApiRequest {
    let local_avatar = match update.avatar.as_deref().map(classify_avatar) {
        Some(AvatarSource::Local(path)) => Some(path),
        Some(AvatarSource::Remote(url)) => {
            log::debug!("Avatar {} is already hosted, leaving it out of the update", url);
            None
        }
        None => None,
    };

    match local_avatar {
        Some(path) => {
            let mut payload = MultipartPayload::default();
            for (name, value) in &update.fields {
                if let Some(text) = form_value(value) {
                    payload = payload.text(name.clone(), text);
                }
            }
            ApiRequest::put(PROFILE_PATH).multipart(payload.file(avatar_part(path, stamp_millis)))
        }
        None => ApiRequest::put(PROFILE_PATH).json_value(Value::Object(update.fields.clone())),
    }
}
