//! Typed entry points for the catalog and role-request endpoints.
//!
//! Listings are returned as raw JSON; the backend paginates some of them and
//! not others, and the client only forwards them to the views.

use reqwest::StatusCode;
use serde_json::Value;

use super::client::ApiClient;
use super::models::RoleRequest;
use super::request::ApiRequest;
use crate::error::{ApiError, Result};

pub type Query<'a> = &'a [(&'a str, &'a str)];

fn with_query(mut request: ApiRequest, query: Query<'_>) -> ApiRequest {
    for (key, value) in query {
        request = request.query(*key, value);
    }
    request
}

impl ApiClient {
    pub async fn restaurants(&self, query: Query<'_>) -> Result<Value> {
        self.send_json(with_query(ApiRequest::get("restaurants/"), query))
            .await
    }

    pub async fn restaurant(&self, id: u64) -> Result<Value> {
        self.get_json(&format!("restaurants/{id}/")).await
    }

    pub async fn restaurant_foods(&self, restaurant_id: u64, query: Query<'_>) -> Result<Value> {
        let path = format!("restaurants/{restaurant_id}/foods/");
        self.send_json(with_query(ApiRequest::get(path), query)).await
    }

    pub async fn foods(&self, query: Query<'_>) -> Result<Value> {
        self.send_json(with_query(ApiRequest::get("restaurants/foods/"), query))
            .await
    }

    pub async fn food(&self, id: u64) -> Result<Value> {
        self.get_json(&format!("restaurants/foods/{id}/")).await
    }

    pub async fn search_foods(&self, text: &str) -> Result<Value> {
        self.send_json(ApiRequest::get("restaurants/foods/search/").query("q", text))
            .await
    }

    pub async fn food_reviews(&self, food_id: u64) -> Result<Value> {
        self.get_json(&format!("restaurants/foods/{food_id}/reviews/"))
            .await
    }

    pub async fn categories(&self) -> Result<Value> {
        self.get_json("restaurants/categories/").await
    }

    pub async fn categories_with_foods(&self, limit: u32) -> Result<Value> {
        self.send_json(ApiRequest::get("restaurants/categories-with-foods/").query("limit", limit))
            .await
    }

    /// Banners are decorative; an auth failure yields an empty list.
    pub async fn banners(&self) -> Result<Value> {
        match self.get_json("restaurants/banners/").await {
            Err(ApiError::Status { status, .. }) if status == StatusCode::UNAUTHORIZED => {
                Ok(Value::Array(Vec::new()))
            }
            Err(ApiError::SessionExpired { .. }) => Ok(Value::Array(Vec::new())),
            other => other,
        }
    }

    pub async fn my_restaurant(&self) -> Result<Value> {
        self.get_json("restaurants/my-restaurant/").await
    }

    pub async fn my_foods(&self) -> Result<Value> {
        self.get_json("restaurants/my-foods/").await
    }

    pub async fn request_role(&self, request: &RoleRequest) -> Result<Value> {
        self.send_json(ApiRequest::post("auth/request/").json(request)?)
            .await
    }

    pub async fn my_role_requests(&self) -> Result<Value> {
        self.get_json("auth/my-requests/").await
    }
}
