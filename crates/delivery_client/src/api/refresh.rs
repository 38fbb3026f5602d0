//! Single-flight access token refresh.
//!
//! The first caller that sees a 401 while idle becomes the leader and performs
//! the exchange. Everyone arriving while it is in flight parks a oneshot
//! continuation and receives the leader's outcome. The flag and the queue
//! share one critical section that is never held across an `.await`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use log::{error, info, warn};
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::oneshot;

use super::client::BaseUrl;
use super::models::{RefreshRequest, RefreshResponse};
use crate::error::RefreshError;
use crate::storage::SessionStore;

pub const TOKEN_REFRESH_PATH: &str = "auth/token/refresh/";

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<String, RefreshError>;
}

/// Calls `POST auth/token/refresh/` on the backend.
#[derive(Debug, Clone)]
pub struct HttpTokenExchange {
    client: Arc<ClientWithMiddleware>,
    base_url: BaseUrl,
}

impl HttpTokenExchange {
    pub fn new(client: Arc<ClientWithMiddleware>, base_url: BaseUrl) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl TokenExchange for HttpTokenExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<String, RefreshError> {
        let url = self
            .base_url
            .join(TOKEN_REFRESH_PATH)
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<RefreshResponse>()
            .await
            .map_err(|_| RefreshError::MissingAccessToken)?;
        match parsed.access {
            Some(access) if !access.is_empty() => Ok(access),
            _ => Err(RefreshError::MissingAccessToken),
        }
    }
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;

#[derive(Default)]
enum RefreshState {
    #[default]
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// What a caller got from [`RefreshCoordinator::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// This caller ran the exchange.
    Led(Result<String, RefreshError>),
    /// This caller waited on someone else's exchange.
    Joined(Result<String, RefreshError>),
    /// The stored token had already moved past the one that was rejected.
    AlreadyRefreshed(String),
}

impl RefreshOutcome {
    pub fn into_result(self) -> Result<String, RefreshError> {
        match self {
            RefreshOutcome::Led(result) | RefreshOutcome::Joined(result) => result,
            RefreshOutcome::AlreadyRefreshed(token) => Ok(token),
        }
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, RefreshOutcome::Led(_))
    }
}

enum Role {
    Leader,
    Waiter(oneshot::Receiver<Result<String, RefreshError>>),
}

/// Settles the queue even if the leader's future is dropped mid-exchange.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, result: &Result<String, RefreshError>) {
        self.settled = true;
        let waiters = self.coordinator.drain();
        if !waiters.is_empty() {
            info!("[Token Refresh] Resuming {} queued request(s)", waiters.len());
        }
        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let waiters = self.coordinator.drain();
            warn!(
                "[Token Refresh] Leader dropped, abandoning {} queued request(s)",
                waiters.len()
            );
        }
    }
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: SessionStore,
    exchange: Arc<dyn TokenExchange>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl RefreshCoordinator {
    pub fn new(store: SessionStore, exchange: Arc<dyn TokenExchange>) -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            exchange,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        match self.state.lock() {
            Ok(state) => matches!(*state, RefreshState::Refreshing { .. }),
            Err(poisoned) => matches!(*poisoned.into_inner(), RefreshState::Refreshing { .. }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut RefreshState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Obtains a fresh access token after `rejected_token` was answered with 401.
    ///
    /// `None` means the rejected request carried no token (public endpoints,
    /// cold-start restore); such a caller always goes through the exchange.
    pub async fn refresh(&self, rejected_token: Option<&str>) -> RefreshOutcome {
        let current = self.store.access_token().await.ok().flatten();

        let role = self.with_state(|state| match state {
            RefreshState::Refreshing { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(Role::Waiter(rx))
            }
            RefreshState::Idle => {
                if let (Some(current), Some(rejected)) = (current.as_deref(), rejected_token) {
                    if rejected != current {
                        return None;
                    }
                }
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                Some(Role::Leader)
            }
        });

        match role {
            None => {
                info!("[Token Refresh] Stored token already replaced, replaying without exchange");
                // `current` is Some whenever the closure returned None.
                RefreshOutcome::AlreadyRefreshed(current.unwrap_or_default())
            }
            Some(Role::Waiter(rx)) => {
                info!("[Token Refresh] Refresh in flight, queueing request");
                let result = rx.await.unwrap_or(Err(RefreshError::Abandoned));
                RefreshOutcome::Joined(result)
            }
            Some(Role::Leader) => RefreshOutcome::Led(self.lead().await),
        }
    }

    async fn lead(&self) -> Result<String, RefreshError> {
        let guard = LeaderGuard {
            coordinator: self,
            settled: false,
        };
        let generation = self.store.generation();
        info!("[Token Refresh] Starting token refresh");

        let result = match self.run_exchange().await {
            Ok(token) => match self.store.save_access_token_if_current(generation, &token).await {
                Ok(true) => Ok(token),
                Ok(false) => Err(RefreshError::SessionReset),
                Err(e) => Err(RefreshError::Storage(e.to_string())),
            },
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => info!("[Token Refresh] Access token refreshed"),
            Err(RefreshError::SessionReset) => {
                info!("[Token Refresh] Session changed during refresh, discarding result")
            }
            Err(e) => {
                warn!("[Token Refresh] Failed: {}", e);
                // A session stored meanwhile is not ours to clear.
                if let Err(clear_err) = self.store.clear_session_if_current(generation).await {
                    error!("[Token Refresh] Failed to clear session: {}", clear_err);
                }
            }
        }

        guard.settle(&result);
        result
    }

    /// Returns to idle and hands out the queue in the same critical section,
    /// so no waiter can park after the drain.
    fn drain(&self) -> Vec<Waiter> {
        self.with_state(|state| match std::mem::take(state) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        })
    }

    async fn run_exchange(&self) -> Result<String, RefreshError> {
        let refresh_token = self
            .store
            .refresh_token()
            .await
            .map_err(|e| RefreshError::Storage(e.to_string()))?
            .ok_or(RefreshError::MissingRefreshToken)?;
        self.exchange.exchange(&refresh_token).await
    }
}
