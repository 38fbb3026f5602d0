pub mod catalog;
pub mod client;
pub mod endpoints;
pub mod middleware;
pub mod models;
pub mod refresh;
pub mod request;

pub use client::{ApiClient, BaseUrl};
pub use endpoints::{is_public, EndpointPolicy};
pub use middleware::AuthHeaderMiddleware;
pub use refresh::{HttpTokenExchange, RefreshCoordinator, RefreshOutcome, TokenExchange};
pub use request::{ApiRequest, FilePart, MultipartPayload, RequestBody};
