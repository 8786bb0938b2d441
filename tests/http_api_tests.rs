use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use unchained::api::{ClientCredentials, DebridApi, HttpDebridApi};
use unchained::auth::{
    AuthError, AuthState, ControllerSettings, DeviceCodePoll, DeviceCodeSession, FailureReason,
    MemoryTokenStore, SessionController, Token, TokenKind, TokenStore,
};
use unchained::user::AccountType;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api(server: &MockServer) -> HttpDebridApi {
    HttpDebridApi::new(ClientCredentials::new("client-123"))
        .with_oauth_base_url(format!("{}/oauth/v2", server.uri()))
        .with_rest_base_url(format!("{}/rest/1.0/", server.uri()))
}

fn session(interval_secs: u64) -> DeviceCodeSession {
    DeviceCodeSession::new(
        "device-123",
        "ABCD1234",
        "https://real-debrid.com/device",
        interval_secs,
        600,
    )
    .expect("valid device code lifetime")
}

async fn mount_token_response(server: &MockServer, status: u16, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(status).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn request_device_code_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/device/code"))
        .and(header("accept", "application/json"))
        .and(body_string_contains("client_id=client-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD1234",
            "interval": 5,
            "expires_in": 600,
            "verification_url": "https://real-debrid.com/device",
            "direct_verification_url": "https://real-debrid.com/authorize?client_id=client-123&device_id=ABCD1234"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = api(&server)
        .request_device_code()
        .await
        .expect("device code");

    assert_eq!(session.device_code, "device-123");
    assert_eq!(session.user_code, "ABCD1234");
    assert_eq!(session.interval_secs, 5);
    assert_eq!(session.expires_in_secs, 600);
    assert!(session.direct_verification_url.is_some());
    assert!(session.expires_at > Utc::now());
}

#[tokio::test]
async fn request_device_code_error_uses_description() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/device/code"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "Unknown client id"
        })))
        .mount(&server)
        .await;

    let err = api(&server).request_device_code().await.unwrap_err();
    assert_eq!(err, AuthError::api(400, "Unknown client id"));
}

#[tokio::test]
async fn request_device_code_with_missing_fields_is_conversion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "user_code": "ABCD" })))
        .mount(&server)
        .await;

    let err = api(&server).request_device_code().await.unwrap_err();
    assert!(matches!(err, AuthError::ApiConversion(_)), "got {err:?}");
}

#[tokio::test]
async fn poll_pending() {
    let server = MockServer::start().await;
    mount_token_response(&server, 400, json!({ "error": "authorization_pending" })).await;

    let poll = api(&server)
        .poll_device_code(&session(5))
        .await
        .expect("poll");
    assert!(matches!(poll, DeviceCodePoll::Pending));
}

#[tokio::test]
async fn poll_slow_down_increases_interval() {
    let server = MockServer::start().await;
    mount_token_response(&server, 400, json!({ "error": "slow_down" })).await;

    let poll = api(&server)
        .poll_device_code(&session(5))
        .await
        .expect("poll");
    match poll {
        DeviceCodePoll::SlowDown { interval_secs } => assert_eq!(interval_secs, 10),
        other => panic!("expected SlowDown, got {other:?}"),
    }
}

#[tokio::test]
async fn poll_expired_and_denied() {
    let server = MockServer::start().await;
    mount_token_response(&server, 400, json!({ "error": "expired_token" })).await;
    let poll = api(&server).poll_device_code(&session(5)).await.expect("poll");
    assert!(matches!(poll, DeviceCodePoll::Expired));

    let server = MockServer::start().await;
    mount_token_response(&server, 400, json!({ "error": "access_denied" })).await;
    let poll = api(&server).poll_device_code(&session(5)).await.expect("poll");
    assert!(matches!(poll, DeviceCodePoll::AccessDenied));
}

#[tokio::test]
async fn poll_authorized_returns_open_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .and(body_string_contains("device_code=device-123"))
        .and(body_string_contains("grant_type=urn"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let poll = api(&server)
        .poll_device_code(&session(5))
        .await
        .expect("poll");
    match poll {
        DeviceCodePoll::Authorized { token } => {
            assert_eq!(token.access_token, "access-1");
            assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
            assert_eq!(token.kind, TokenKind::Open);
            assert!(token.expires_at.is_some_and(|at| at > Utc::now()));
        }
        other => panic!("expected Authorized, got {other:?}"),
    }
}

#[tokio::test]
async fn poll_unknown_error_is_api_error() {
    let server = MockServer::start().await;
    mount_token_response(
        &server,
        400,
        json!({ "error": "invalid_grant", "error_description": "Bad device code" }),
    )
    .await;

    let err = api(&server)
        .poll_device_code(&session(5))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::api(400, "Bad device code"));
}

#[tokio::test]
async fn poll_empty_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = api(&server)
        .poll_device_code(&session(5))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::EmptyBody);
}

#[tokio::test]
async fn poll_malformed_success_is_conversion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = api(&server)
        .poll_device_code(&session(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ApiConversion(_)), "got {err:?}");
}

#[tokio::test]
async fn refresh_keeps_previous_refresh_token_when_omitted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token/refresh"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = Token::open("access-1", Some("refresh-1".to_string()), Some(60)).unwrap();
    let fresh = api(&server).refresh_token(&old).await.expect("refresh");

    assert_eq!(fresh.access_token, "access-2");
    assert_eq!(fresh.refresh_token.as_deref(), Some("refresh-1"));
    assert!(fresh.expires_at > old.expires_at);
}

#[tokio::test]
async fn refresh_rejects_private_tokens_without_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let err = api(&server)
        .refresh_token(&Token::private("PRIVATE"))
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::NotRefreshable);
}

#[tokio::test]
async fn fetch_user_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/1.0/user"))
        .and(header("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42,
            "username": "hippo",
            "email": "hippo@example.com",
            "points": 1200,
            "locale": "en",
            "avatar": "https://example.com/avatar.png",
            "type": "premium",
            "premium": 864000,
            "expiration": "2026-11-19T10:00:00.000Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let user = api(&server)
        .fetch_user(&Token::private("access-1"))
        .await
        .expect("user");

    assert_eq!(user.id, 42);
    assert_eq!(user.username, "hippo");
    assert_eq!(user.account_type, AccountType::Premium);
    assert_eq!(user.premium_days_left(), 10);
}

#[tokio::test]
async fn fetch_user_unauthorized_maps_to_invalid_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/1.0/user"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "bad_token",
            "error_code": 8
        })))
        .mount(&server)
        .await;

    let err = api(&server)
        .fetch_user(&Token::private("expired"))
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::api(401, "bad_token"));
    assert!(err.is_unauthorized());
    assert_eq!(err.reason(), unchained::auth::FailureReason::InvalidToken);
}

#[tokio::test]
async fn slow_server_times_out_as_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/1.0/user"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = api(&server)
        .with_timeout(Duration::from_millis(100))
        .expect("client")
        .fetch_user(&Token::private("access-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::Network(_)), "got {err:?}");
}

#[tokio::test]
async fn request_device_code_with_oversized_lifetime_is_conversion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD1234",
            "interval": 5,
            "expires_in": u64::MAX,
            "verification_url": "https://real-debrid.com/device"
        })))
        .mount(&server)
        .await;

    let err = api(&server).request_device_code().await.unwrap_err();
    assert!(matches!(err, AuthError::ApiConversion(_)), "got {err:?}");
}

#[tokio::test]
async fn poll_with_out_of_range_expiry_is_conversion_error() {
    let server = MockServer::start().await;
    mount_token_response(
        &server,
        200,
        json!({ "access_token": "a", "refresh_token": "r", "expires_in": i64::MAX }),
    )
    .await;

    let err = api(&server)
        .poll_device_code(&session(5))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::ApiConversion(_)), "got {err:?}");
}

#[tokio::test]
async fn refresh_with_out_of_range_expiry_is_conversion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": i64::MIN
        })))
        .expect(1)
        .mount(&server)
        .await;

    let old = Token::open("access-1", Some("refresh-1".to_string()), Some(60)).unwrap();
    let err = api(&server).refresh_token(&old).await.unwrap_err();
    assert!(matches!(err, AuthError::ApiConversion(_)), "got {err:?}");
}

#[tokio::test]
async fn slow_down_answers_never_shrink_the_interval() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "slow_down" })))
        .expect(2)
        .mount(&server)
        .await;
    let api = api(&server);

    for base in [5, 15] {
        match api.poll_device_code(&session(base)).await.expect("poll") {
            DeviceCodePoll::SlowDown { interval_secs } => assert_eq!(interval_secs, base + 5),
            other => panic!("expected SlowDown, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn controller_survives_out_of_range_token_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-123",
            "user_code": "ABCD1234",
            "interval": 1,
            "expires_in": 600,
            "verification_url": "https://real-debrid.com/device"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/v2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": i64::MAX
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/1.0/user"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let controller = SessionController::new(
        Arc::new(api(&server)),
        store.clone(),
        ControllerSettings::builder().auto_refresh(false).build(),
    );

    controller.begin_login().await.expect("begin login");
    let settled = tokio::time::timeout(
        Duration::from_secs(10),
        controller.wait_for(|state| !state.is_in_progress()),
    )
    .await
    .expect("poller settles instead of panicking");

    assert_eq!(
        settled,
        AuthState::WaitingUserAction(FailureReason::ApiConversion)
    );
    assert!(store.get().expect("store readable").is_none());
}
