use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Backend role. Roles this client does not know keep their original name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum UserRole {
    #[default]
    Customer,
    Seller,
    Shipper,
    Admin,
    Other(String),
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Seller => "seller",
            UserRole::Shipper => "shipper",
            UserRole::Admin => "admin",
            UserRole::Other(raw) => raw,
        }
    }
}

impl From<String> for UserRole {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "customer" => UserRole::Customer,
            "seller" | "restaurant" => UserRole::Seller,
            "shipper" => UserRole::Shipper,
            "admin" => UserRole::Admin,
            _ => UserRole::Other(raw),
        }
    }
}

impl From<UserRole> for String {
    fn from(role: UserRole) -> Self {
        match role {
            UserRole::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

/// Cached mirror of the backend identity.
///
/// Fields the client does not interpret are kept in `extra` so that a profile
/// written back to storage loses nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.is_staff || self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub(crate) struct RawTokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// `{ tokens: { access, refresh }, user }` or flat `{ access, refresh, user? }`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LoginResponse {
    #[serde(default)]
    pub tokens: Option<RawTokens>,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl LoginResponse {
    pub fn token_pair(&self) -> Option<TokenPair> {
        let nested = self.tokens.clone().unwrap_or_default();
        let access = nested.access.or_else(|| self.access.clone())?;
        let refresh = nested.refresh.or_else(|| self.refresh.clone())?;
        if access.is_empty() || refresh.is_empty() {
            return None;
        }
        Some(TokenPair { access, refresh })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshResponse {
    #[serde(default)]
    pub access: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedRole {
    Shipper,
    #[serde(rename = "restaurant")]
    Seller,
}

/// Body of a "become a shipper / seller" request.
#[derive(Debug, Clone, Serialize)]
pub struct RoleRequest {
    pub request_type: RequestedRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}
