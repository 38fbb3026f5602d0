//! Public / private endpoint classification.
//!
//! The backend serves its catalog without authentication, but rejects a public
//! call that carries an expired token. The pipeline therefore needs to know, per
//! request, whether to attach the bearer token or strip it.

use lazy_static::lazy_static;
use reqwest::Method;

use crate::config::DEFAULT_API_PREFIX;

/// Always private, even when an allow-listed prefix also matches.
pub const PRIVATE_PATHS: &[&str] = &[
    "/auth/logout/",
    "/restaurants/my-restaurant/",
    "/restaurants/my-foods/",
];

/// Servable without authentication, matched by prefix.
pub const PUBLIC_PATHS: &[&str] = &[
    "/auth/login/",
    "/auth/register/",
    "/auth/token/refresh/",
    "/auth/token/verify/",
    "/restaurants/",
    "/restaurants/banners/",
    "/restaurants/categories/",
    "/restaurants/categories-with-foods/",
    "/foods/",
    "/categories/",
    "/provinces/",
    "/banners/",
    "/reviews/",
    "/ai/recommendations/",
];

lazy_static! {
    static ref DEFAULT_POLICY: EndpointPolicy = EndpointPolicy::default();
}

#[derive(Debug, Clone)]
pub struct EndpointPolicy {
    api_prefix: String,
    public_paths: Vec<String>,
    private_paths: Vec<String>,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_API_PREFIX)
    }
}

impl EndpointPolicy {
    pub fn with_prefix(api_prefix: &str) -> Self {
        EndpointPolicy {
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
            public_paths: PUBLIC_PATHS.iter().map(|p| p.to_string()).collect(),
            private_paths: PRIVATE_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Strips the query string and the API prefix segment.
    pub fn normalize<'a>(&self, path: &'a str) -> &'a str {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        if self.api_prefix.is_empty() {
            return path;
        }
        match path.strip_prefix(self.api_prefix.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => path,
        }
    }

    /// Deny-list first, then allow-list; anything unknown requires auth.
    pub fn is_public(&self, path: &str, _method: &Method) -> bool {
        let clean = self.normalize(path);
        let clean = if clean.starts_with('/') {
            std::borrow::Cow::Borrowed(clean)
        } else {
            std::borrow::Cow::Owned(format!("/{clean}"))
        };

        if self.private_paths.iter().any(|p| clean.starts_with(p.as_str())) {
            return false;
        }
        self.public_paths.iter().any(|p| clean.starts_with(p.as_str()))
    }
}

/// Classifies against the default `/api`-prefixed policy.
pub fn is_public(path: &str, method: &Method) -> bool {
    DEFAULT_POLICY.is_public(path, method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_prefixes_are_public() {
        for path in PUBLIC_PATHS {
            assert!(is_public(path, &Method::GET), "{path} should be public");
            let nested = format!("{path}42/details/");
            assert!(is_public(&nested, &Method::GET), "{nested} should be public");
        }
    }

    #[test]
    fn deny_list_wins_over_public_prefix() {
        assert!(!is_public("/restaurants/my-restaurant/", &Method::GET));
        assert!(!is_public("/restaurants/my-foods/12/", &Method::PATCH));
        assert!(!is_public("/api/auth/logout/", &Method::POST));
        assert!(is_public("/restaurants/12/", &Method::GET));
    }

    #[test]
    fn unknown_paths_fail_closed() {
        assert!(!is_public("/orders/", &Method::GET));
        assert!(!is_public("/auth/profile/", &Method::GET));
        assert!(!is_public("", &Method::GET));
        assert!(!is_public("/", &Method::GET));
    }

    #[test]
    fn api_prefix_and_query_are_ignored() {
        assert!(is_public("/api/restaurants/?page=2", &Method::GET));
        assert!(is_public("auth/login/", &Method::POST));
        assert!(!is_public("/api/orders/?status=pending", &Method::GET));
        assert!(!is_public("/apiary/restaurants/", &Method::GET));
    }

    #[test]
    fn custom_prefix_is_normalized() {
        let policy = EndpointPolicy::with_prefix("/v2/api/");
        assert_eq!(policy.normalize("/v2/api/foods/?q=pho"), "/foods/");
        assert!(policy.is_public("/v2/api/foods/", &Method::GET));
        assert!(!policy.is_public("/v2/api/auth/logout/", &Method::POST));
    }
}
