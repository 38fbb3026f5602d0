//! Client core for the food delivery app: endpoint classification, token
//! storage, the authenticated request pipeline with single-flight refresh, and
//! the auth session built on top of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod paths;
pub mod storage;

pub use api::models::{RequestedRole, RoleRequest, TokenPair, UserProfile, UserRole};
pub use api::{ApiClient, ApiRequest, EndpointPolicy, MultipartPayload};
pub use auth::{AuthFailure, AuthSession, ProfileUpdate, SessionPhase, SessionSnapshot};
pub use config::Config;
pub use error::{ApiError, ConfigError, ErrorKind, RefreshError, StorageError};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, SessionStore};
