use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use super::messages::{self, AuthFailure};
use super::profile::{build_update_request, ProfileUpdate, PROFILE_PATH};
use crate::api::models::{LoginRequest, LoginResponse, RefreshRequest, UserProfile};
use crate::api::{ApiClient, ApiRequest};
use crate::config::Config;
use crate::error::{ApiError, ConfigError, ErrorKind};
use crate::paths;
use crate::storage::{FileKeyValueStore, SessionStore, StoredTokens};

pub const LOGIN_PATH: &str = "auth/login/";
pub const REGISTER_PATH: &str = "auth/register/";
pub const LOGOUT_PATH: &str = "auth/logout/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    LoggedOut,
    Restoring,
    LoggedIn,
}

/// What the rest of the application observes about the session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub user: Option<UserProfile>,
    pub access_token: Option<String>,
}

impl SessionSnapshot {
    fn logged_in(user: UserProfile, access_token: String) -> Self {
        SessionSnapshot {
            phase: SessionPhase::LoggedIn,
            user: Some(user),
            access_token: Some(access_token),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some() && self.user.is_some()
    }
}

/// Owns login, logout, restore and profile mutation.
///
/// Every operation reports failures as [`AuthFailure`] values carrying a
/// message ready for display.
#[derive(Debug)]
pub struct AuthSession {
    api: ApiClient,
    logout_timeout: Duration,
    state: watch::Sender<SessionSnapshot>,
}

fn is_hard_auth_failure(err: &ApiError) -> bool {
    err.is_session_expired()
        || matches!(
            err.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        )
}

impl AuthSession {
    pub fn new(api: ApiClient, config: &Config) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        AuthSession {
            api,
            logout_timeout: config.logout_timeout(),
            state,
        }
    }

    /// Session persisted under the configured data directory.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let path = paths::session_store_path(&config.data_dir());
        let store = SessionStore::new(Arc::new(FileKeyValueStore::new(path)));
        Ok(Self::new(ApiClient::new(config, store)?, config))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    fn store(&self) -> &SessionStore {
        self.api.store()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    fn publish(&self, snapshot: SessionSnapshot) {
        self.state.send_replace(snapshot);
    }

    /// Clears persisted and in-memory session state.
    async fn reset(&self) -> SessionPhase {
        if let Err(e) = self.store().clear_session().await {
            error!("Failed to clear session storage: {}", e);
        }
        self.publish(SessionSnapshot::default());
        SessionPhase::LoggedOut
    }

    /// Forces a logout after a caller received a session-expired error.
    pub async fn handle_auth_error(&self) {
        info!("Handling auth error, forcing logout");
        self.reset().await;
    }

    async fn observe_error(&self, err: &ApiError) {
        if err.is_session_expired() {
            self.reset().await;
        }
    }

    /// Rebuilds the session from storage on cold start.
    pub async fn restore(&self) -> SessionPhase {
        self.state.send_modify(|s| s.phase = SessionPhase::Restoring);

        let tokens = match self.store().tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                error!("Failed to load session storage: {}", e);
                return self.reset().await;
            }
        };

        let access = match tokens {
            StoredTokens {
                access: None,
                refresh: None,
            } => {
                self.publish(SessionSnapshot::default());
                return SessionPhase::LoggedOut;
            }
            StoredTokens {
                access: Some(_),
                refresh: None,
            } => {
                warn!("Access token without refresh token, clearing session");
                return self.reset().await;
            }
            StoredTokens {
                access: None,
                refresh: Some(_),
            } => {
                info!("Refreshing access token on restore");
                match self.api.refresh_coordinator().refresh(None).await.into_result() {
                    Ok(token) => token,
                    Err(e) => {
                        warn!("Stored refresh token is no longer valid: {}", e);
                        return self.reset().await;
                    }
                }
            }
            StoredTokens {
                access: Some(access),
                refresh: Some(_),
            } => access,
        };

        let cached = match self.store().user().await {
            Ok(user) => user,
            Err(e) => {
                warn!("Failed to read cached profile: {}", e);
                None
            }
        };
        if let Some(user) = cached {
            self.publish(SessionSnapshot::logged_in(user, access));
            return SessionPhase::LoggedIn;
        }

        let generation = self.store().generation();
        let request = ApiRequest::get(PROFILE_PATH).bearer(access.clone());
        match self.api.send_json::<UserProfile>(request).await {
            Ok(user) => {
                match self.store().save_user_if_current(generation, &user).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Session changed while restoring, dropping fetched profile");
                        return self.phase();
                    }
                    Err(e) => warn!("Failed to cache profile: {}", e),
                }
                // A refresh during the fetch may have replaced the token.
                let access = self.store().access_token().await.ok().flatten().unwrap_or(access);
                self.publish(SessionSnapshot::logged_in(user, access));
                SessionPhase::LoggedIn
            }
            Err(e) if is_hard_auth_failure(&e) => {
                warn!("Profile fetch rejected during restore: {}", e);
                self.reset().await
            }
            Err(e) => {
                warn!("Profile fetch failed during restore, keeping tokens: {}", e);
                self.publish(SessionSnapshot {
                    phase: SessionPhase::LoggedOut,
                    user: None,
                    access_token: Some(access),
                });
                SessionPhase::LoggedOut
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, AuthFailure> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&LoginRequest {
                username: username.trim(),
                password,
            })
            .map_err(|e| messages::login_failure(&e))?
            .without_refresh();

        let response: LoginResponse = self
            .api
            .send_json(request)
            .await
            .map_err(|e| {
                warn!("Login failed: {}", e);
                messages::login_failure(&e)
            })?;

        let tokens = response
            .token_pair()
            .ok_or_else(|| AuthFailure::new(messages::MISSING_TOKENS, ErrorKind::Other))?;

        let user = match response.user {
            Some(user) => user,
            None => {
                let request = ApiRequest::get(PROFILE_PATH)
                    .bearer(tokens.access.clone())
                    .without_refresh();
                self.api
                    .send_json::<UserProfile>(request)
                    .await
                    .map_err(|e| messages::login_failure(&e))?
            }
        };

        self.store()
            .save_session(&tokens.access, &tokens.refresh, Some(&user))
            .await
            .map_err(|e| {
                error!("Failed to persist session: {}", e);
                AuthFailure::new(e.to_string(), ErrorKind::Other)
            })?;

        info!("Logged in as {}", user.username);
        self.publish(SessionSnapshot::logged_in(user.clone(), tokens.access));
        Ok(user)
    }

    pub async fn register<T: Serialize + ?Sized>(&self, form: &T) -> Result<Value, AuthFailure> {
        let request = ApiRequest::post(REGISTER_PATH)
            .json(form)
            .map_err(|e| messages::register_failure(&e))?
            .without_refresh();
        self.api.send_json::<Value>(request).await.map_err(|e| {
            warn!("Registration failed: {}", e);
            messages::register_failure(&e)
        })
    }

    /// Clears local state first, then tells the backend on a best-effort basis.
    pub async fn logout(&self) -> Result<(), AuthFailure> {
        let tokens = self.store().tokens().await.unwrap_or_default();

        let cleared = self.store().clear_session().await;
        self.publish(SessionSnapshot::default());

        if let Some(refresh) = tokens.refresh {
            self.notify_logout(&refresh, tokens.access).await;
        }

        cleared.map_err(|e| {
            error!("Failed to clear session storage on logout: {}", e);
            AuthFailure::new(e.to_string(), ErrorKind::Other)
        })
    }

    async fn notify_logout(&self, refresh: &str, access: Option<String>) {
        let mut request = match ApiRequest::post(LOGOUT_PATH).json(&RefreshRequest { refresh }) {
            Ok(request) => request.without_refresh().timeout(self.logout_timeout),
            Err(e) => {
                warn!("Logout notification skipped: {}", e);
                return;
            }
        };
        if let Some(access) = access {
            request = request.bearer(access);
        }

        match tokio::time::timeout(self.logout_timeout, self.api.send(request)).await {
            Ok(Ok(_)) => info!("Backend acknowledged logout"),
            Ok(Err(e)) => info!("Logout API call failed (non-critical): {}", e),
            Err(_) => info!(
                "Logout API call timed out after {:?} (non-critical)",
                self.logout_timeout
            ),
        }
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, AuthFailure> {
        let generation = self.store().generation();
        let request = build_update_request(update, chrono::Utc::now().timestamp_millis());
        let user = match self.api.send_json::<UserProfile>(request).await {
            Ok(user) => user,
            Err(e) => {
                warn!("Profile update failed: {}", e);
                self.observe_error(&e).await;
                return Err(messages::profile_update_failure(&e));
            }
        };

        match self.store().save_user_if_current(generation, &user).await {
            Ok(true) => self.state.send_modify(|s| s.user = Some(user.clone())),
            Ok(false) => info!("Session changed during profile update, not caching result"),
            Err(e) => warn!("Failed to cache updated profile: {}", e),
        }
        Ok(user)
    }

    /// Fetches the profile again and overwrites the cached copy.
    pub async fn reload_profile(&self) -> Result<UserProfile, AuthFailure> {
        let generation = self.store().generation();
        let user = match self.api.get_json::<UserProfile>(PROFILE_PATH).await {
            Ok(user) => user,
            Err(e) => {
                self.observe_error(&e).await;
                return Err(messages::login_failure(&e));
            }
        };
        match self.store().save_user_if_current(generation, &user).await {
            Ok(true) => {}
            Ok(false) => return Ok(user),
            Err(e) => warn!("Failed to cache profile: {}", e),
        }
        let access = self.store().access_token().await.ok().flatten();
        self.state.send_modify(|s| {
            s.user = Some(user.clone());
            if access.is_some() {
                s.access_token = access.clone();
                s.phase = SessionPhase::LoggedIn;
            }
        });
        Ok(user)
    }
}
