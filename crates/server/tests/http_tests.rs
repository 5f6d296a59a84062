//! HTTP boundary tests driven through the full router.

mod common;

use axum::http::{HeaderValue, StatusCode, header};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_test::{TestResponse, TestServer};
use base64::Engine;
use common::*;
use fortress_id::AppResources;
use fortress_id::api::build_router;
use fortress_id::config::AppConfig;
use fortress_id::oauth2::OAuth2State;
use fortress_id::oauth2::directory::DbUserDirectory;
use fortress_id::oauth2::session::{CSRF_COOKIE, SESSION_COOKIE};
use serde_json::Value;
use time::OffsetDateTime;

const EMAIL: &str = "alice@example.org";
const PASSWORD: &str = "Correct-Horse-9";

async fn server_with(config: AppConfig) -> (TestServer, OAuth2State) {
    let state = test_state_with(config).await;
    register_c1(&state).await;
    DbUserDirectory::new(state.db.clone(), state.config.lockout.clone())
        .create_user(EMAIL, "Alice", PASSWORD, true)
        .await
        .expect("create user");

    let resources = AppResources {
        db: state.db.clone(),
        config: state.config.clone(),
    };
    let server = TestServer::new(build_router(state.clone(), resources)).expect("create test server");
    (server, state)
}

async fn server() -> (TestServer, OAuth2State) {
    server_with(test_config()).await
}

fn value(v: &str) -> HeaderValue {
    HeaderValue::from_str(v).expect("header value")
}

fn basic_auth() -> HeaderValue {
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));
    value(&format!("Basic {encoded}"))
}

fn location(response: &TestResponse) -> String {
    response
        .header(header::LOCATION)
        .to_str()
        .expect("location")
        .to_string()
}

/// Value of a cookie set by the response, if any.
fn response_cookie(response: &TestResponse, name: &str) -> Option<Cookie<'static>> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| Cookie::parse(v.to_string()).ok())
        .find(|cookie| cookie.name() == name)
}

fn set_cookie(response: &TestResponse, name: &str) -> Option<String> {
    response_cookie(response, name).map(|cookie| cookie.value().to_string())
}

fn query_pairs(url: &str) -> Vec<(String, String)> {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

fn query_value(url: &str, key: &str) -> Option<String> {
    query_pairs(url)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

fn session_cookie(state: &OAuth2State) -> HeaderValue {
    let token = state
        .sessions
        .issue(&principal(), OffsetDateTime::now_utc())
        .expect("session");
    value(&format!("{SESSION_COOKIE}={token}"))
}

async fn authorize(server: &TestServer, cookie: Option<HeaderValue>, scope: &str) -> TestResponse {
    let request = authorization_request(scope);
    let mut call = server
        .get("/connect/authorize")
        .add_query_param("response_type", &request.response_type)
        .add_query_param("client_id", &request.client_id)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("scope", scope)
        .add_query_param("state", "xyz")
        .add_query_param("code_challenge", request.code_challenge.unwrap_or_default())
        .add_query_param("code_challenge_method", "S256");
    if let Some(cookie) = cookie {
        call = call.add_header(header::COOKIE, cookie);
    }
    call.await
}

async fn redeem(server: &TestServer, code: &str, verifier: &str) -> TestResponse {
    server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", verifier),
        ])
        .await
}

#[tokio::test]
async fn test_health() {
    let (server, _) = server().await;
    let response = server.get("/healthz").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn test_discovery_and_jwks() {
    let (server, _) = server().await;

    let response = server.get("/.well-known/openid-configuration").await;
    response.assert_status_ok();
    let doc: Value = response.json();
    assert_eq!(doc["issuer"], ISSUER);
    assert_eq!(doc["authorization_endpoint"], format!("{ISSUER}/connect/authorize"));
    assert_eq!(doc["token_endpoint"], format!("{ISSUER}/connect/token"));
    assert_eq!(doc["jwks_uri"], format!("{ISSUER}/.well-known/jwks.json"));
    assert_eq!(doc["code_challenge_methods_supported"], serde_json::json!(["S256"]));
    assert_eq!(doc["id_token_signing_alg_values_supported"], serde_json::json!(["EdDSA"]));

    let response = server.get("/.well-known/jwks.json").await;
    response.assert_status_ok();
    let jwks: Value = response.json();
    assert_eq!(jwks["keys"][0]["kty"], "OKP");
    assert_eq!(jwks["keys"][0]["crv"], "Ed25519");
    assert_eq!(jwks["keys"][0]["kid"], "test-key");
}

#[tokio::test]
async fn test_api_docs_are_served() {
    let (server, _) = server().await;
    server.get("/api-docs").await.assert_status_ok();
}

#[tokio::test]
async fn test_authorize_without_session_redirects_to_login() {
    let (server, _) = server().await;
    let response = authorize(&server, None, "openid").await;
    response.assert_status(StatusCode::SEE_OTHER);

    let target = location(&response);
    assert!(target.starts_with("/account/login?return_url="));
    let return_url = query_value(&target, "return_url").expect("return_url");
    assert!(return_url.starts_with("/connect/authorize?"));
    // The original parameters survive verbatim
    assert_eq!(query_value(&return_url, "state").as_deref(), Some("xyz"));
    assert_eq!(query_value(&return_url, "redirect_uri").as_deref(), Some(REDIRECT_URI));
}

#[tokio::test]
async fn test_authorize_client_errors_are_not_redirected() {
    let (server, state) = server().await;

    let response = server
        .get("/connect/authorize")
        .add_header(header::COOKIE, session_cookie(&state))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "ghost")
        .add_query_param("redirect_uri", REDIRECT_URI)
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");

    let response = server
        .get("/connect/authorize")
        .add_header(header::COOKIE, session_cookie(&state))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", "https://evil/cb")
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_policy_errors_redirect_to_the_client() {
    let (server, state) = server().await;

    let response = authorize(&server, Some(session_cookie(&state)), "openid admin").await;
    response.assert_status(StatusCode::SEE_OTHER);
    let target = location(&response);
    assert!(target.starts_with(REDIRECT_URI));
    assert_eq!(query_value(&target, "error").as_deref(), Some("invalid_scope"));
    assert_eq!(query_value(&target, "state").as_deref(), Some("xyz"));
    assert_eq!(query_value(&target, "code"), None);

    let response = server
        .get("/connect/authorize")
        .add_header(header::COOKIE, session_cookie(&state))
        .add_query_param("response_type", "code")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("redirect_uri", REDIRECT_URI)
        .add_query_param("code_challenge", VERIFIER)
        .add_query_param("code_challenge_method", "plain")
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(
        query_value(&location(&response), "error").as_deref(),
        Some("invalid_request")
    );
}

#[tokio::test]
async fn test_token_errors_are_uniform() {
    let (server, state) = server().await;

    let unknown = redeem(&server, "no-such-code", VERIFIER).await;

    let code = query_value(
        &location(&authorize(&server, Some(session_cookie(&state)), "openid").await),
        "code",
    )
    .expect("code");
    let mismatch = redeem(&server, &code, &"a".repeat(43)).await;

    for response in [&unknown, &mismatch] {
        response.assert_status_bad_request();
        assert_eq!(
            response.header(header::CACHE_CONTROL),
            HeaderValue::from_static("no-store")
        );
    }
    assert_eq!(unknown.text(), mismatch.text());
    let body: Value = unknown.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_endpoint_request_errors() {
    let (server, _) = server().await;

    let response = server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[("grant_type", "password")])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "unsupported_grant_type");

    let response = server
        .post("/connect/token")
        .form(&[("grant_type", "authorization_code"), ("code", "x")])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_client");
    assert!(response.maybe_header(header::WWW_AUTHENTICATE).is_some());

    let response = server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", "x"),
            ("client_secret", CLIENT_SECRET),
        ])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_malformed_parameters_are_invalid_request() {
    let (server, _) = server().await;

    let response = server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .text("grant_type=authorization_code&code=x")
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    let response = server
        .post("/connect/revoke")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[("token_type_hint", "refresh_token")])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");

    let response = server
        .get("/connect/authorize")
        .add_query_param("client_id", CLIENT_ID)
        .add_query_param("scope", "openid")
        .add_query_param("scope", "email")
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_full_login_and_token_flow() {
    let (server, _) = server().await;

    // Unauthenticated authorize sends the user to the login page
    let response = authorize(&server, None, "openid profile").await;
    let login_target = location(&response);
    let return_url = query_value(&login_target, "return_url").expect("return_url");

    let page = server
        .get("/account/login")
        .add_query_param("return_url", &return_url)
        .await;
    page.assert_status_ok();
    assert!(page.text().contains("name=\"csrf_token\""));
    let csrf = set_cookie(&page, CSRF_COOKIE).expect("csrf cookie");

    // Missing CSRF cookie is refused
    let response = server
        .post("/account/login")
        .form(&[
            ("email", EMAIL),
            ("password", PASSWORD),
            ("return_url", return_url.as_str()),
            ("csrf_token", csrf.as_str()),
        ])
        .await;
    response.assert_status_bad_request();

    let response = server
        .post("/account/login")
        .add_header(header::COOKIE, value(&format!("{CSRF_COOKIE}={csrf}")))
        .form(&[
            ("email", EMAIL),
            ("password", "Wrong-Password-1"),
            ("return_url", return_url.as_str()),
            ("csrf_token", csrf.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.text().contains("Invalid email or password."));

    let response = server
        .post("/account/login")
        .add_header(header::COOKIE, value(&format!("{CSRF_COOKIE}={csrf}")))
        .form(&[
            ("email", EMAIL),
            ("password", PASSWORD),
            ("return_url", return_url.as_str()),
            ("csrf_token", csrf.as_str()),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(location(&response), return_url);
    let session = set_cookie(&response, SESSION_COOKIE).expect("session cookie");
    let session_flags = response_cookie(&response, SESSION_COOKIE).expect("set-cookie");
    assert_eq!(session_flags.http_only(), Some(true));
    assert_eq!(session_flags.secure(), Some(true));
    assert_eq!(session_flags.same_site(), Some(SameSite::Lax));
    assert_eq!(session_flags.path(), Some("/"));

    // Replaying the preserved request with the session yields a code
    let mut replay = server
        .get("/connect/authorize")
        .add_header(header::COOKIE, value(&format!("{SESSION_COOKIE}={session}")));
    for (key, val) in query_pairs(&return_url) {
        replay = replay.add_query_param(&key, &val);
    }
    let response = replay.await;
    response.assert_status(StatusCode::SEE_OTHER);
    let callback = location(&response);
    assert!(callback.starts_with(REDIRECT_URI));
    assert_eq!(query_value(&callback, "state").as_deref(), Some("xyz"));
    let code = query_value(&callback, "code").expect("code");

    let response = redeem(&server, &code, VERIFIER).await;
    response.assert_status_ok();
    assert_eq!(
        response.header(header::CACHE_CONTROL),
        HeaderValue::from_static("no-store")
    );
    let tokens: Value = response.json();
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "openid profile");
    assert!(tokens["id_token"].is_string());
    let access_token = tokens["access_token"].as_str().expect("access token").to_string();
    let refresh_token = tokens["refresh_token"].as_str().expect("refresh token").to_string();

    // Protected resource
    let response = server
        .get("/api/secret")
        .add_header(header::AUTHORIZATION, value(&format!("Bearer {access_token}")))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user"], "Alice");
    assert_eq!(body["your_claims"]["aud"], CLIENT_ID);

    // Refresh, then revoke
    let response = server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token.as_str())])
        .await;
    response.assert_status_ok();
    let rotated: Value = response.json();
    let successor = rotated["refresh_token"].as_str().expect("successor").to_string();
    assert_ne!(successor, refresh_token);

    let response = server
        .post("/connect/revoke")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[("token", successor.as_str())])
        .await;
    response.assert_status_ok();

    let response = server
        .post("/connect/token")
        .add_header(header::AUTHORIZATION, basic_auth())
        .form(&[("grant_type", "refresh_token"), ("refresh_token", successor.as_str())])
        .await;
    response.assert_status_bad_request();
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_login_rejects_foreign_return_url() {
    let mut config = test_config();
    config.security.disable_csrf = true;
    let (server, _) = server_with(config).await;

    let response = server
        .post("/account/login")
        .form(&[
            ("email", EMAIL),
            ("password", PASSWORD),
            ("return_url", "https://evil.example/steal"),
        ])
        .await;
    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_secret_requires_an_access_token() {
    let (server, state) = server().await;

    let response = server.get("/api/secret").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(response.maybe_header(header::WWW_AUTHENTICATE).is_some());

    let response = server
        .get("/api/secret")
        .add_header(header::AUTHORIZATION, value("Bearer garbage"))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"], "invalid_token");

    // Identity tokens are not accepted as access tokens
    let code = query_value(
        &location(&authorize(&server, Some(session_cookie(&state)), "openid").await),
        "code",
    )
    .expect("code");
    let tokens: Value = redeem(&server, &code, VERIFIER).await.json();
    let id_token = tokens["id_token"].as_str().expect("id token");
    let response = server
        .get("/api/secret")
        .add_header(header::AUTHORIZATION, value(&format!("Bearer {id_token}")))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

