//! Integration tests for the authenticated request pipeline


use std::time::Duration;

use delivery_client::error::RefreshError;
use delivery_client::storage::{StoredTokens, ACCESS_TOKEN_ALIAS, REFRESH_TOKEN_ALIAS, USER_KEY};
use delivery_client::api::FilePart;
use delivery_client::{ApiClient, ApiError, ApiRequest, Config, MultipartPayload};
use reqwest::StatusCode;
use serde_json::json;
use test_utils::{client_for, profile_json, session_for, RequestCounter, TestStore};
use wiremock::matchers::{body_json, header, header_exists, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .and(body_json(json!({ "refresh": "refresh-1" })))
        .respond_with(response)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn public_request_never_carries_authorization() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("access-1", "refresh-1").await;

    // Any request that still has a bearer lands on this trap
    Mock::given(method("GET"))
        .and(path("/api/restaurants/"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(418))
        .with_priority(1)
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/restaurants/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &store);
    let restaurants = client.restaurants(&[("page", "1")]).await.unwrap();
    assert_eq!(restaurants, json!([{ "id": 1 }]));
}

#[tokio::test]
async fn owner_scoped_read_is_private_despite_public_prefix() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("access-1", "refresh-1").await;

    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-restaurant/"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 3 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, &store);
    assert_eq!(client.my_restaurant().await.unwrap(), json!({ "id": 3 }));
}

#[tokio::test]
async fn unreachable_backend_is_a_network_error() {
    let store = TestStore::logged_in("access-1", "refresh-1").await;
    let client = ApiClient::new(&Config::with_api_base("http://127.0.0.1:1/api/"), store.store.clone())
        .unwrap();

    let err = client.my_restaurant().await.unwrap_err();
    assert!(err.is_network(), "unexpected error: {err:?}");
    // No refresh for a missing response
    assert_eq!(store.store.access_token().await.unwrap().as_deref(), Some("access-1"));
}

#[tokio::test]
async fn concurrent_401s_share_a_single_refresh() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("stale", "refresh-1").await;

    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-foods/"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "detail": "expired" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-foods/"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access": "fresh" }))
            .set_delay(Duration::from_millis(150)),
        1,
    )
    .await;

    let client = client_for(&server, &store);
    let results = futures::future::join_all((0..5).map(|_| {
        let client = client.clone();
        async move { client.my_foods().await }
    }))
    .await;

    for result in results {
        assert_eq!(result.unwrap(), json!([]));
    }
    assert_eq!(store.store.access_token().await.unwrap().as_deref(), Some("fresh"));
    assert_eq!(store.raw_item(ACCESS_TOKEN_ALIAS).await.as_deref(), Some("fresh"));
    assert_eq!(store.store.refresh_token().await.unwrap().as_deref(), Some("refresh-1"));
    assert!(!client.refresh_coordinator().is_refreshing());
}

#[tokio::test]
async fn replayed_request_is_not_refreshed_twice() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("stale", "refresh-1").await;

    Mock::given(method("GET"))
        .and(path("/api/auth/my-requests/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "access": "fresh" })),
        1,
    )
    .await;

    let client = client_for(&server, &store);
    let err = client.my_role_requests().await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    // The refreshed token stays; only a failed exchange clears the session
    assert_eq!(store.store.access_token().await.unwrap().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn failed_refresh_clears_every_session_key() {
    let server = MockServer::start().await;
    let store = TestStore::new();
    let user: delivery_client::UserProfile =
        serde_json::from_value(profile_json("mai", "customer")).unwrap();
    store
        .store
        .save_session("stale", "refresh-1", Some(&user))
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-restaurant/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(401).set_body_json(json!({ "detail": "Token is blacklisted" })),
        1,
    )
    .await;

    let client = client_for(&server, &store);
    let err = client.my_restaurant().await.unwrap_err();

    match err {
        ApiError::SessionExpired { cause } => {
            assert!(matches!(cause, RefreshError::Rejected { status: 401, .. }));
        }
        other => panic!("expected session expiry, got {other:?}"),
    }
    assert_eq!(store.store.tokens().await.unwrap(), StoredTokens::default());
    assert!(store.raw_item(ACCESS_TOKEN_ALIAS).await.is_none());
    assert!(store.raw_item(REFRESH_TOKEN_ALIAS).await.is_none());
    assert!(store.raw_item(USER_KEY).await.is_none());
}

#[tokio::test]
async fn missing_refresh_token_expires_session_without_exchange() {
    let server = MockServer::start().await;
    let store = TestStore::new();

    Mock::given(method("GET"))
        .and(path("/api/auth/profile/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(200), 0).await;

    let client = client_for(&server, &store);
    let err = client.get_json::<serde_json::Value>("auth/profile/").await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::SessionExpired {
            cause: RefreshError::MissingRefreshToken
        }
    ));
}

#[tokio::test]
async fn public_request_is_replayed_without_credentials_after_failed_refresh() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("stale", "refresh-1").await;
    let counter = RequestCounter::new();
    let attempts = counter.clone();

    Mock::given(method("GET"))
        .and(path("/api/restaurants/categories/"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempts.increment() == 0 {
                ResponseTemplate::new(401)
            } else {
                ResponseTemplate::new(200).set_body_json(json!([{ "name": "Noodles" }]))
            }
        })
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let client = client_for(&server, &store);
    let categories = client.categories().await.unwrap();

    assert_eq!(categories, json!([{ "name": "Noodles" }]));
    assert_eq!(counter.get(), 2);
    assert!(store.store.access_token().await.unwrap().is_none());
}

#[tokio::test]
async fn banners_degrade_to_empty_list_on_auth_failure() {
    let server = MockServer::start().await;
    let store = TestStore::new();

    Mock::given(method("GET"))
        .and(path("/api/restaurants/banners/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server, &store);
    assert_eq!(client.banners().await.unwrap(), json!([]));
}

#[tokio::test]
async fn base_url_switch_applies_to_later_requests() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let store = TestStore::new();

    Mock::given(method("GET"))
        .and(path("/api/restaurants/categories/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["second"])))
        .expect(1)
        .mount(&second)
        .await;

    let client = client_for(&first, &store);
    client
        .set_api_base_url(&format!("{}/api", second.uri()))
        .unwrap();

    assert_eq!(client.categories().await.unwrap(), json!(["second"]));
    assert!(first.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn logout_during_refresh_keeps_session_cleared() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("stale", "refresh-1").await;

    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-foods/"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/restaurants/my-foods/"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/token/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "fresh" }))
                .set_delay(Duration::from_millis(400)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = session_for(&server, &store, None);
    let api = session.api().clone();
    let in_flight = tokio::spawn(async move { api.my_foods().await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    session.logout().await.unwrap();

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_session_expired(), "unexpected error: {err:?}");
    assert_eq!(store.store.tokens().await.unwrap(), StoredTokens::default());
    assert!(store.raw_item(ACCESS_TOKEN_ALIAS).await.is_none());
    assert!(store.raw_item(REFRESH_TOKEN_ALIAS).await.is_none());
    assert!(!session.is_authenticated());
    assert!(!session.api().refresh_coordinator().is_refreshing());
}

#[tokio::test]
async fn caller_multipart_content_type_gives_way_to_generated_boundary() {
    let server = MockServer::start().await;
    let store = TestStore::logged_in("access-1", "refresh-1").await;
    let avatar = store.dir.path().join("pic.png");
    std::fs::write(&avatar, b"png bytes").unwrap();

    Mock::given(method("PUT"))
        .and(path("/api/auth/profile/"))
        .and(header_regex("content-type", "^multipart/form-data; boundary=.+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let payload = MultipartPayload::default().text("first_name", "Linh").file(FilePart {
        field: "avatar".to_string(),
        file_name: "pic.png".to_string(),
        path: avatar,
        mime: "image/png".to_string(),
    });
    let request = ApiRequest::put("auth/profile/")
        .header("Content-Type", "multipart/form-data")
        .multipart(payload);

    let client = client_for(&server, &store);
    let body: serde_json::Value = client.send_json(request).await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
}
