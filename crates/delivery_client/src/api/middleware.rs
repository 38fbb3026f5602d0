//! Outgoing request shaping.
//!
//! Installed on the shared `ClientWithMiddleware`, so every request that leaves
//! through it gets the same treatment: public endpoints lose any
//! `Authorization` header, private endpoints get the current bearer token.

use std::sync::Arc;

use async_trait::async_trait;
use http::Extensions;
use log::{debug, warn};
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};

use super::endpoints::EndpointPolicy;
use super::request::PinnedBearer;
use crate::storage::SessionStore;

#[derive(Debug, Clone)]
pub struct AuthHeaderMiddleware {
    policy: Arc<EndpointPolicy>,
    store: SessionStore,
}

impl AuthHeaderMiddleware {
    pub fn new(policy: Arc<EndpointPolicy>, store: SessionStore) -> Self {
        Self { policy, store }
    }
}

/// Keeps a single usable multipart `Content-Type`.
///
/// A caller may add `Content-Type: multipart/form-data` through
/// [`ApiRequest::header`](super::ApiRequest::header); reqwest appends its own
/// value with the boundary next to it. The generated one wins, and a
/// multipart type without any boundary is dropped.
fn dedupe_multipart_content_type(req: &mut Request) {
    let values: Vec<HeaderValue> = req.headers().get_all(CONTENT_TYPE).iter().cloned().collect();
    let generated = values.iter().find(|v| {
        v.to_str()
            .map(|s| s.starts_with("multipart/") && s.contains("boundary="))
            .unwrap_or(false)
    });
    if let Some(generated) = generated.cloned() {
        if values.len() > 1 {
            debug!("Removing manually set Content-Type from multipart upload");
        }
        req.headers_mut().insert(CONTENT_TYPE, generated);
    } else if values.iter().any(|v| {
        v.to_str()
            .map(|s| s.starts_with("multipart/"))
            .unwrap_or(false)
    }) {
        debug!("Removing boundary-less multipart Content-Type");
        req.headers_mut().remove(CONTENT_TYPE);
    }
}

fn bearer_header(token: &str) -> Option<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).ok()?;
    value.set_sensitive(true);
    Some(value)
}

#[async_trait]
impl Middleware for AuthHeaderMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let method = req.method().clone();
        let path = req.url().path().to_string();
        let is_public = self.policy.is_public(&path, &method);

        if is_public {
            if req.headers_mut().remove(AUTHORIZATION).is_some() {
                debug!("Stripped Authorization header from public {} {}", method, path);
            }
        } else {
            let token = match extensions.get::<PinnedBearer>() {
                Some(PinnedBearer(pinned)) => pinned.clone(),
                None => self
                    .store
                    .access_token()
                    .await
                    .map_err(reqwest_middleware::Error::middleware)?,
            };
            match token.as_deref().and_then(bearer_header) {
                Some(value) => {
                    req.headers_mut().insert(AUTHORIZATION, value);
                }
                None => {
                    req.headers_mut().remove(AUTHORIZATION);
                    warn!("No access token available for protected {} {}", method, path);
                }
            }
        }

        dedupe_multipart_content_type(&mut req);

        debug!("[API Request] {} {} public={}", method, path, is_public);
        next.run(req, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    fn request_with_content_types(values: &[&'static str]) -> Request {
        let mut req = Request::new(
            Method::PUT,
            "http://localhost/api/auth/profile/".parse().unwrap(),
        );
        for value in values {
            req.headers_mut()
                .append(CONTENT_TYPE, HeaderValue::from_static(value));
        }
        req
    }

    #[test]
    fn manual_multipart_content_type_is_replaced_by_generated_one() {
        let mut req = request_with_content_types(&[
            "multipart/form-data",
            "multipart/form-data; boundary=abc123",
        ]);
        dedupe_multipart_content_type(&mut req);

        let values: Vec<_> = req.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "multipart/form-data; boundary=abc123");
    }

    #[test]
    fn boundary_less_multipart_header_is_removed() {
        let mut req = request_with_content_types(&["multipart/form-data"]);
        dedupe_multipart_content_type(&mut req);
        assert!(req.headers().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn json_content_type_is_untouched() {
        let mut req = request_with_content_types(&["application/json"]);
        dedupe_multipart_content_type(&mut req);
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn bearer_header_is_sensitive() {
        let value = bearer_header("abc").unwrap();
        assert!(value.is_sensitive());
        assert_eq!(value, "Bearer abc");
    }
}
