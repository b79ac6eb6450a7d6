//! Session protocol tests against a wiremock identity/resource server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use virtuele_core::{
    ApiError, AuthScheme, MemoryTokenStore, RequestSpec, SessionClient, SessionError,
    SessionState, TokenStore,
};

fn logged_in_store() -> Arc<MemoryTokenStore> {
    Arc::new(MemoryTokenStore::with_tokens("old-access", "refresh-1"))
}

fn client_for(server: &MockServer, store: Arc<MemoryTokenStore>) -> SessionClient {
    SessionClient::new(server.uri(), store).expect("Failed to build session client")
}

async fn mount_refresh(server: &MockServer, access: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/jwt/refresh/"))
        .and(body_json(json!({ "refresh": "refresh-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access": access })))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn login_persists_returned_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jwt/create/"))
        .and(body_json(json!({ "username": "dewi", "password": "hunter2" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "access-1", "refresh": "refresh-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let client = client_for(&server, store.clone());

    let creds = client.login("dewi", "hunter2").await.unwrap();
    assert_eq!(creds.access, "access-1");
    assert_eq!(store.access().await.as_deref(), Some("access-1"));
    assert_eq!(store.refresh().await.as_deref(), Some("refresh-1"));
    assert_eq!(client.state(), SessionState::Authenticated);
    assert!(client.is_authenticated().await);
}

#[tokio::test]
async fn failed_login_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jwt/create/"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({ "detail": "No active account found" })),
        )
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let client = client_for(&server, store.clone());

    let err = client.login("dewi", "wrong").await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(ApiError::Unauthorized)));
    assert!(store.access().await.is_none());
    assert!(store.refresh().await.is_none());
    assert_eq!(client.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn successful_request_passes_through_with_jwt_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "JWT old-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 1 }])))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "unused", 0).await;

    let client = client_for(&server, logged_in_store());
    let response = client.request(RequestSpec::get("/cart/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!([{ "id": 1 }]));
}

#[tokio::test]
async fn unauthorized_request_is_refreshed_and_replayed_once() {
    let server = MockServer::start().await;
    let review = json!({ "rating": 5, "review": "Fits well" });

    Mock::given(method("POST"))
        .and(path("/products/tee/reviews/"))
        .and(header("Authorization", "JWT old-access"))
        .and(body_json(review.clone()))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/products/tee/reviews/"))
        .and(header("Authorization", "JWT new-access"))
        .and(body_json(review.clone()))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "new-access", 1).await;

    let store = logged_in_store();
    let client = client_for(&server, store.clone());

    let response = client
        .request(RequestSpec::post("/products/tee/reviews/").json(review))
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(store.access().await.as_deref(), Some("new-access"));
    assert_eq!(store.refresh().await.as_deref(), Some("refresh-1"));
    assert_eq!(client.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn later_requests_use_the_refreshed_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "JWT old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "JWT new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(3)
        .mount(&server)
        .await;
    mount_refresh(&server, "new-access", 1).await;

    let client = client_for(&server, logged_in_store());
    for _ in 0..3 {
        let response = client.request(RequestSpec::get("/cart/")).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}

#[tokio::test]
async fn second_unauthorized_is_final() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(&server, "new-access", 1).await;

    let store = logged_in_store();
    let client = client_for(&server, store.clone());

    let err = client.request(RequestSpec::get("/cart/")).await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(ApiError::Unauthorized)));
    assert!(!err.is_session_expired());
    // The refresh itself worked, so the session stays
    assert_eq!(store.access().await.as_deref(), Some("new-access"));
    assert_eq!(store.refresh().await.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn refresh_failure_logs_out_and_reports_refresh_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jwt/refresh/"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "detail": "Token is invalid or expired" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let client = client_for(&server, store.clone());

    let err = client.request(RequestSpec::get("/cart/")).await.unwrap_err();
    assert!(err.is_session_expired());
    match err {
        SessionError::RefreshFailure(ApiError::BadRequest(body)) => {
            assert!(body.contains("Token is invalid or expired"));
        }
        other => panic!("expected refresh failure, got {other:?}"),
    }
    assert!(store.access().await.is_none());
    assert!(store.refresh().await.is_none());
    assert_eq!(client.state(), SessionState::LoggedOut);
}

#[tokio::test]
async fn logout_is_idempotent() {
    let store = logged_in_store();
    let client = SessionClient::new("http://127.0.0.1:9", store.clone()).unwrap();

    client.logout().await.unwrap();
    assert!(store.access().await.is_none());
    assert!(store.refresh().await.is_none());

    client.logout().await.unwrap();
    assert!(store.access().await.is_none());
    assert!(store.refresh().await.is_none());
    assert_eq!(client.state(), SessionState::LoggedOut);
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/cart/checkout/"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, "unused", 0).await;

    let store = logged_in_store();
    let client = client_for(&server, store.clone());

    let err = client
        .request(RequestSpec::post("/cart/checkout/"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport(ApiError::ServerError(ref body)) if body == "boom"));
    assert_eq!(store.access().await.as_deref(), Some("old-access"));
    assert_eq!(store.refresh().await.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn timeouts_are_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;
    mount_refresh(&server, "unused", 0).await;

    let store = logged_in_store();
    let client =
        SessionClient::with_timeout(server.uri(), store.clone(), Duration::from_millis(50)).unwrap();

    let err = client.request(RequestSpec::get("/cart/")).await.unwrap_err();
    match err {
        SessionError::Transport(ApiError::NetworkError(e)) => assert!(e.is_timeout()),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(store.is_authenticated().await);
}

#[tokio::test]
async fn rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jwt/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "access-2", "refresh": "refresh-2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = logged_in_store();
    let client = client_for(&server, store.clone());

    assert_eq!(client.refresh().await.unwrap(), "access-2");
    assert_eq!(store.access().await.as_deref(), Some("access-2"));
    assert_eq!(store.refresh().await.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn missing_refresh_token_fails_without_calling_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jwt/refresh/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(MemoryTokenStore::new()));
    let err = client.request(RequestSpec::get("/cart/")).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::RefreshFailure(ApiError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn concurrent_unauthorized_requests_share_one_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "JWT old-access"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1..=2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "JWT new-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/jwt/refresh/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access": "new-access" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = Arc::new(client_for(&server, logged_in_store()));
    let (a, b) = futures::join!(
        client.request(RequestSpec::get("/cart/")),
        client.request(RequestSpec::get("/cart/")),
    );
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
}

#[tokio::test]
async fn bearer_scheme_is_used_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cart/"))
        .and(header("Authorization", "Bearer old-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, logged_in_store()).with_scheme(AuthScheme::Bearer);
    let carts: Vec<serde_json::Value> = client.request_json(RequestSpec::get("/cart/")).await.unwrap();
    assert!(carts.is_empty());
}

#[tokio::test]
async fn successful_request_with_stored_tokens_marks_session_authenticated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/me/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": "ana" })))
        .expect(2)
        .mount(&server)
        .await;

    // Never restored: the first successful call is what marks the session
    let client = client_for(&server, logged_in_store());
    assert_eq!(client.state(), SessionState::Unauthenticated);
    client.request(RequestSpec::get("/users/me/")).await.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);

    let anonymous = client_for(&server, Arc::new(MemoryTokenStore::new()));
    anonymous.request(RequestSpec::get("/users/me/")).await.unwrap();
    assert_eq!(anonymous.state(), SessionState::Unauthenticated);
}
