use std::sync::{Arc, RwLock};

use log::{error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Method, Proxy, Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use url::Url;

use super::endpoints::EndpointPolicy;
use super::middleware::AuthHeaderMiddleware;
use super::refresh::{HttpTokenExchange, RefreshCoordinator, TokenExchange};
use super::request::{ApiRequest, PinnedBearer, RequestBody};
use crate::config::Config;
use crate::error::{ApiError, ConfigError, Result};
use crate::storage::SessionStore;

/// Base URL shared by the pipeline and the refresh exchange; can be switched at
/// runtime (e.g. between LAN addresses).
#[derive(Debug, Clone)]
pub struct BaseUrl(Arc<RwLock<Url>>);

fn normalize_base(raw: &str) -> std::result::Result<Url, ConfigError> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "not a base URL".to_string(),
        });
    }
    Ok(url)
}

impl BaseUrl {
    pub fn parse(raw: &str) -> std::result::Result<Self, ConfigError> {
        Ok(BaseUrl(Arc::new(RwLock::new(normalize_base(raw)?))))
    }

    pub fn get(&self) -> Url {
        match self.0.read() {
            Ok(url) => url.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, raw: &str) -> std::result::Result<(), ConfigError> {
        let url = normalize_base(raw)?;
        match self.0.write() {
            Ok(mut guard) => *guard = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
        Ok(())
    }

    /// Resolves an endpoint path relative to the base, with or without a
    /// leading slash.
    pub fn join(&self, path: &str) -> std::result::Result<Url, url::ParseError> {
        self.get().join(path.trim_start_matches('/'))
    }
}

fn apply_proxies(mut builder: reqwest::ClientBuilder, config: &Config) -> std::result::Result<reqwest::ClientBuilder, ConfigError> {
    if !config.http_proxy.is_empty() {
        builder = builder.proxy(Proxy::http(&config.http_proxy)?);
    }
    if !config.https_proxy.is_empty() {
        builder = builder.proxy(Proxy::https(&config.https_proxy)?);
    }
    Ok(builder)
}

struct ApiClientInner {
    http: Arc<ClientWithMiddleware>,
    base_url: BaseUrl,
    policy: Arc<EndpointPolicy>,
    store: SessionStore,
    refresh: RefreshCoordinator,
}

/// Authenticated request pipeline.
///
/// Every call is classified, gets the bearer token attached or stripped by
/// [`AuthHeaderMiddleware`], and a 401 goes through the single-flight refresh
/// before the request is replayed once.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url().as_str())
            .field("refresh", &self.inner.refresh)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(config: &Config, store: SessionStore) -> std::result::Result<Self, ConfigError> {
        let (http, base_url, policy) = Self::build_transport(config, &store)?;
        let exchange = Arc::new(HttpTokenExchange::new(Arc::clone(&http), base_url.clone()));
        Ok(Self::assemble(http, base_url, policy, store, exchange))
    }

    /// Same pipeline with a caller-provided refresh exchange.
    pub fn with_exchange(
        config: &Config,
        store: SessionStore,
        exchange: Arc<dyn TokenExchange>,
    ) -> std::result::Result<Self, ConfigError> {
        let (http, base_url, policy) = Self::build_transport(config, &store)?;
        Ok(Self::assemble(http, base_url, policy, store, exchange))
    }

    fn build_transport(
        config: &Config,
        store: &SessionStore,
    ) -> std::result::Result<(Arc<ClientWithMiddleware>, BaseUrl, Arc<EndpointPolicy>), ConfigError> {
        let base_url = BaseUrl::parse(&config.api_base)?;
        let policy = Arc::new(EndpointPolicy::with_prefix(&config.api_prefix));

        let builder = Client::builder()
            .default_headers(Self::get_default_headers())
            .timeout(config.request_timeout());
        let client = apply_proxies(builder, config)?.build()?;

        let http = ClientBuilder::new(client)
            .with(AuthHeaderMiddleware::new(Arc::clone(&policy), store.clone()))
            .build();
        Ok((Arc::new(http), base_url, policy))
    }

    fn assemble(
        http: Arc<ClientWithMiddleware>,
        base_url: BaseUrl,
        policy: Arc<EndpointPolicy>,
        store: SessionStore,
        exchange: Arc<dyn TokenExchange>,
    ) -> Self {
        let refresh = RefreshCoordinator::new(store.clone(), exchange);
        ApiClient {
            inner: Arc::new(ApiClientInner {
                http,
                base_url,
                policy,
                store,
                refresh,
            }),
        }
    }

    /// No Content-Type here: JSON bodies set their own, multipart bodies get
    /// the transport-generated boundary.
    pub fn get_default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    pub fn store(&self) -> &SessionStore {
        &self.inner.store
    }

    pub fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    pub fn base_url(&self) -> Url {
        self.inner.base_url.get()
    }

    pub fn set_api_base_url(&self, url: &str) -> std::result::Result<(), ConfigError> {
        self.inner.base_url.set(url)?;
        info!("API base URL set to {}", self.inner.base_url.get());
        Ok(())
    }

    pub fn is_public(&self, path: &str, method: &Method) -> bool {
        self.inner.policy.is_public(path, method)
    }

    /// Sends one attempt; returns the response and the token it carried.
    async fn dispatch(&self, request: &ApiRequest) -> Result<(Response, Option<String>)> {
        let url = self
            .inner
            .base_url
            .join(&request.path)
            .map_err(|e| ApiError::InvalidRequest(format!("bad path {:?}: {e}", request.path)))?;
        let is_public = self.is_public(url.path(), &request.method);

        let mut builder = self.inner.http.request(request.method.clone(), url.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(payload) => builder.multipart(payload.to_form().await?),
        };

        let bearer = if is_public {
            None
        } else {
            match &request.bearer {
                Some(token) => Some(token.clone()),
                None => self.inner.store.access_token().await?,
            }
        };
        if !is_public {
            builder = builder.with_extension(PinnedBearer(bearer.clone()));
        }

        let start_time = std::time::Instant::now();
        match builder.send().await {
            Ok(response) => {
                info!(
                    "{} {} -> {} after {:?}",
                    request.method,
                    url.path(),
                    response.status(),
                    start_time.elapsed()
                );
                Ok((response, bearer))
            }
            Err(e) => {
                error!("No response from {} {}: {}", request.method, url.path(), e);
                Err(ApiError::from_middleware(e))
            }
        }
    }

    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        let (response, sent_token) = self.dispatch(&request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED && !request.retried {
            return self.recover_unauthorized(request, sent_token).await;
        }

        warn!("{} {} failed with {}", request.method, request.path, status);
        Err(ApiError::from_response(response).await)
    }

    async fn recover_unauthorized(
        &self,
        request: ApiRequest,
        sent_token: Option<String>,
    ) -> Result<Response> {
        let outcome = self.inner.refresh.refresh(sent_token.as_deref()).await;
        let led = outcome.is_leader();

        match outcome.into_result() {
            Ok(token) => self.send_replay(request.replay_with(token)).await,
            Err(cause) => {
                let is_public = self
                    .inner
                    .base_url
                    .join(&request.path)
                    .map(|url| self.is_public(url.path(), &request.method))
                    .unwrap_or(false);
                if led && is_public && !request.no_auth_retry {
                    info!(
                        "Refresh failed, retrying public {} {} without credentials",
                        request.method, request.path
                    );
                    return self.send_replay(request.replay_without_auth()).await;
                }
                Err(ApiError::SessionExpired { cause })
            }
        }
    }

    async fn send_replay(&self, replay: ApiRequest) -> Result<Response> {
        debug_assert!(replay.retried);
        let (response, _) = self.dispatch(&replay).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        warn!(
            "Replayed {} {} failed with {}",
            replay.method,
            replay.path,
            response.status()
        );
        Err(ApiError::from_response(response).await)
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }
}
