//! OAuth2 / OpenID Connect HTTP endpoints.
//!
//! - `GET|POST /connect/authorize` - Authorization endpoint
//! - `POST /connect/token` - Token endpoint
//! - `POST /connect/revoke` - Token revocation (RFC 7009)
//! - `GET /.well-known/openid-configuration` - Discovery document
//! - `GET /.well-known/jwks.json` - Signing key set

use crate::entity::oauth2_client;
use crate::error::{ErrorResponse, OAuthError};
use crate::oauth2::authorization::{AuthorizationRequest, RESPONSE_TYPE_CODE};
use crate::oauth2::codec::JwkSet;
use crate::oauth2::exchange::{ClientCredentials, TokenSet};
use crate::oauth2::pkce::METHOD_S256;
use crate::oauth2::{OAUTH2_TAG, state::OAuth2State};
use axum::{
    Form, Json,
    extract::{
        Query, RawQuery, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use base64::Engine;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Scopes advertised in the discovery document.
pub const SUPPORTED_SCOPES: [&str; 4] = ["openid", "email", "profile", "roles"];

pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(authorize_get, authorize_post))
        .routes(routes!(token))
        .routes(routes!(revoke))
        .routes(routes!(openid_configuration))
        .routes(routes!(jwks))
        .merge(super::login::router())
        .with_state(state)
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// `authorization_code` or `refresh_token`
    #[serde(default)]
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    /// Optional narrowing of the refreshed scopes
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    pub jwks_uri: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve client credentials from HTTP Basic (`client_secret_basic`) or the
/// form body (`client_secret_post`). Using both at once is rejected.
pub fn client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "));

    let Some(encoded) = basic else {
        let client_id = form_client_id
            .filter(|id| !id.is_empty())
            .ok_or(OAuthError::InvalidClient)?;
        return Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: form_client_secret.map(String::from),
        });
    };

    if form_client_secret.is_some() {
        return Err(OAuthError::InvalidRequest(
            "multiple client authentication methods".into(),
        ));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(OAuthError::InvalidClient)?;
    let (raw_id, raw_secret) = decoded.split_once(':').ok_or(OAuthError::InvalidClient)?;
    let client_id = urlencoding::decode(raw_id).map_err(|_| OAuthError::InvalidClient)?;
    let client_secret = urlencoding::decode(raw_secret).map_err(|_| OAuthError::InvalidClient)?;

    if form_client_id.is_some_and(|id| id != client_id) {
        return Err(OAuthError::InvalidRequest("client_id mismatch".into()));
    }

    Ok(ClientCredentials {
        client_id: client_id.into_owned(),
        client_secret: Some(client_secret.into_owned()),
    })
}

/// Malformed parameters are an OAuth2 `invalid_request`, not a plain-text
/// extractor error.
fn form_params<T>(form: Result<Form<T>, FormRejection>) -> Result<T, OAuthError> {
    form.map(|Form(value)| value).map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected malformed form body");
        OAuthError::InvalidRequest(rejection.body_text())
    })
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Send an authorization error back to the client's (already validated)
/// redirect URI.
fn error_redirect(redirect_uri: &str, state: Option<&str>, error: &OAuthError) -> Response {
    let Ok(mut url) = url::Url::parse(redirect_uri) else {
        return OAuthError::InvalidRedirectUri.into_response();
    };
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("error", error.error_code());
        if let Some(description) = error.description() {
            query.append_pair("error_description", &description);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Redirect::to(url.as_str()).into_response()
}

async fn handle_authorize(
    state: OAuth2State,
    jar: CookieJar,
    request: AuthorizationRequest,
    original_query: String,
) -> Response {
    let principal = state.sessions.principal_from_jar(&jar);

    match state.authorization.authorize(&request, principal.as_ref()).await {
        Ok(issued) => match issued.redirect_location() {
            Ok(location) => Redirect::to(&location).into_response(),
            Err(e) => e.into_response(),
        },
        Err(OAuthError::AuthenticationRequired) => {
            let return_url = format!("/connect/authorize?{original_query}");
            Redirect::to(&format!(
                "/account/login?return_url={}",
                urlencoding::encode(&return_url)
            ))
            .into_response()
        }
        Err(
            e @ (OAuthError::InvalidClient
            | OAuthError::InvalidRedirectUri
            | OAuthError::StoreUnavailable
            | OAuthError::Internal(_)),
        ) => {
            tracing::debug!(error = %e, "Authorization request rejected");
            e.into_response()
        }
        Err(e) => {
            tracing::debug!(error = %e, "Authorization request rejected, redirecting to client");
            match request.redirect_uri.as_deref() {
                Some(uri) => error_redirect(uri, request.state.as_deref(), &e),
                None => e.into_response(),
            }
        }
    }
}

// =============================================================================
// Endpoints
// =============================================================================

/// Authorization endpoint (query parameters).
#[tracing::instrument(skip(state, jar, raw_query, request))]
#[utoipa::path(
    get,
    path = "/connect/authorize",
    tag = OAUTH2_TAG,
    operation_id = "Authorize",
    summary = "Start the Authorization Code flow",
    description = "Validates the client, redirect URI, scopes and PKCE challenge, then redirects back to the \
                   client with a one-time `code`. Without a session the user is sent to `/account/login` \
                   with the original request preserved as `return_url`.\n\n\
                   **PKCE is mandatory:** `code_challenge_method` must be `S256`.",
    params(AuthorizationRequest),
    responses(
        (status = 303, description = "Redirect to the client with a code or error, or to the login page"),
        (status = 400, description = "Malformed request or invalid redirect URI", body = ErrorResponse),
        (status = 401, description = "Unknown client", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn authorize_get(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    RawQuery(raw_query): RawQuery,
    request: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Response {
    let request = match request {
        Ok(Query(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected malformed authorization request");
            return OAuthError::InvalidRequest(rejection.body_text()).into_response();
        }
    };
    handle_authorize(state, jar, request, raw_query.unwrap_or_default()).await
}

/// Authorization endpoint (form body).
#[tracing::instrument(skip(state, jar, body))]
#[utoipa::path(
    post,
    path = "/connect/authorize",
    tag = OAUTH2_TAG,
    operation_id = "Authorize (form post)",
    summary = "Start the Authorization Code flow with form parameters",
    description = "Same as `GET /connect/authorize` with the parameters sent as a form body.",
    request_body(
        content = AuthorizationRequest,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 303, description = "Redirect to the client with a code or error, or to the login page"),
        (status = 400, description = "Invalid redirect URI", body = ErrorResponse),
        (status = 401, description = "Unknown client", body = ErrorResponse),
    )
)]
pub async fn authorize_post(
    State(state): State<OAuth2State>,
    jar: CookieJar,
    body: String,
) -> Response {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    let request = authorization_request_from_pairs(&pairs);
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(&pairs)
        .finish();
    handle_authorize(state, jar, request, query).await
}

fn authorization_request_from_pairs(pairs: &[(String, String)]) -> AuthorizationRequest {
    let mut request = AuthorizationRequest::default();
    for (key, value) in pairs {
        let value = value.clone();
        match key.as_str() {
            "response_type" => request.response_type = value,
            "client_id" => request.client_id = value,
            "redirect_uri" => request.redirect_uri = Some(value),
            "scope" => request.scope = Some(value),
            "state" => request.state = Some(value),
            "nonce" => request.nonce = Some(value),
            "code_challenge" => request.code_challenge = Some(value),
            "code_challenge_method" => request.code_challenge_method = Some(value),
            _ => {}
        }
    }
    request
}

/// Token endpoint.
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/connect/token",
    tag = OAUTH2_TAG,
    operation_id = "Token",
    summary = "Exchange a code or refresh token for tokens",
    description = "Redeems an authorization code (with `code_verifier`) or rotates a refresh token. \
                   Clients authenticate with HTTP Basic or `client_id`/`client_secret` form fields; public \
                   clients send only `client_id`.\n\n\
                   Every grant failure is reported as `invalid_grant` with the same description. \
                   Presenting an already used refresh token revokes its whole family.",
    request_body(
        content = TokenRequest,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 200, description = "Tokens issued", body = TokenSet),
        (status = 400, description = "Invalid request or grant", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn token(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let form = match form_params(form) {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    tracing::debug!(grant_type = %form.grant_type, "Token request");
    match exchange_tokens(&state, &headers, &form).await {
        Ok(tokens) => no_store((StatusCode::OK, Json(tokens)).into_response()),
        Err(e) => e.into_response(),
    }
}

async fn exchange_tokens(
    state: &OAuth2State,
    headers: &HeaderMap,
    form: &TokenRequest,
) -> Result<TokenSet, OAuthError> {
    let credentials = client_credentials(
        headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    )?;
    match form.grant_type.as_str() {
        oauth2_client::GRANT_AUTHORIZATION_CODE => {
            let code = form
                .code
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("code is required".into()))?;
            state
                .exchange
                .redeem_code(
                    &credentials,
                    code,
                    form.redirect_uri.as_deref(),
                    form.code_verifier.as_deref(),
                )
                .await
        }
        oauth2_client::GRANT_REFRESH_TOKEN => {
            let refresh_token = form
                .refresh_token
                .as_deref()
                .ok_or_else(|| OAuthError::InvalidRequest("refresh_token is required".into()))?;
            state
                .exchange
                .refresh(&credentials, refresh_token, form.scope.as_deref())
                .await
        }
        "" => Err(OAuthError::InvalidRequest("grant_type is required".into())),
        _ => Err(OAuthError::UnsupportedGrantType),
    }
}

/// Token revocation endpoint (RFC 7009).
#[tracing::instrument(skip(state, headers, form))]
#[utoipa::path(
    post,
    path = "/connect/revoke",
    tag = OAUTH2_TAG,
    operation_id = "Revoke",
    summary = "Revoke a refresh token",
    description = "Revokes the refresh token and every token in its rotation family. Unknown tokens are \
                   accepted silently. Access tokens are self-contained and expire on their own.",
    request_body(
        content = RevokeRequest,
        content_type = "application/x-www-form-urlencoded",
    ),
    responses(
        (status = 200, description = "Token revoked or unknown"),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Client authentication failed", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse),
    )
)]
pub async fn revoke(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let form = match form_params(form) {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };
    let credentials = match client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    ) {
        Ok(credentials) => credentials,
        Err(e) => return e.into_response(),
    };

    match state.exchange.revoke(&credentials, &form.token).await {
        Ok(()) => no_store(StatusCode::OK.into_response()),
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect discovery document.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = OAUTH2_TAG,
    operation_id = "OpenID Configuration",
    summary = "OpenID Connect discovery document",
    responses(
        (status = 200, description = "Discovery document", body = OpenIdConfiguration),
    )
)]
pub async fn openid_configuration(State(state): State<OAuth2State>) -> Json<OpenIdConfiguration> {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    Json(OpenIdConfiguration {
        issuer: state.config.issuer().to_string(),
        authorization_endpoint: state.endpoint_url("/connect/authorize"),
        token_endpoint: state.endpoint_url("/connect/token"),
        revocation_endpoint: state.endpoint_url("/connect/revoke"),
        jwks_uri: state.endpoint_url("/.well-known/jwks.json"),
        response_types_supported: strings(&[RESPONSE_TYPE_CODE]),
        grant_types_supported: strings(&[
            oauth2_client::GRANT_AUTHORIZATION_CODE,
            oauth2_client::GRANT_REFRESH_TOKEN,
        ]),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&["EdDSA"]),
        scopes_supported: strings(&SUPPORTED_SCOPES),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: strings(&[METHOD_S256]),
        claims_supported: strings(&["sub", "iss", "aud", "iat", "exp", "name", "nonce"]),
    })
}

/// Public signing keys.
#[tracing::instrument(skip(state))]
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = OAUTH2_TAG,
    operation_id = "JWKS",
    summary = "Token signing key set",
    responses(
        (status = 200, description = "JWK set with the Ed25519 verification key", body = JwkSet),
    )
)]
pub async fn jwks(State(state): State<OAuth2State>) -> Json<JwkSet> {
    Json(state.codec.jwks())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(id: &str, secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{id}:{secret}"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn reads_basic_credentials_url_decoded() {
        let creds = client_credentials(&basic("my%20client", "p%3Ass"), None, None).unwrap();
        assert_eq!(creds.client_id, "my client");
        assert_eq!(creds.client_secret.as_deref(), Some("p:ss"));
    }

    #[test]
    fn reads_form_credentials() {
        let creds = client_credentials(&HeaderMap::new(), Some("c1"), None).unwrap();
        assert_eq!(creds.client_id, "c1");
        assert_eq!(creds.client_secret, None);
    }

    #[test]
    fn rejects_missing_or_duplicate_credentials() {
        assert!(matches!(
            client_credentials(&HeaderMap::new(), None, None),
            Err(OAuthError::InvalidClient)
        ));
        assert!(matches!(
            client_credentials(&basic("c1", "s"), Some("c1"), Some("s")),
            Err(OAuthError::InvalidRequest(_))
        ));
        assert!(matches!(
            client_credentials(&basic("c1", "s"), Some("c2"), None),
            Err(OAuthError::InvalidRequest(_))
        ));
    }

    #[test]
    fn parses_form_authorization_requests() {
        let pairs = vec![
            ("response_type".to_string(), "code".to_string()),
            ("client_id".to_string(), "c1".to_string()),
            ("scope".to_string(), "openid email".to_string()),
            ("extra".to_string(), "kept".to_string()),
        ];
        let request = authorization_request_from_pairs(&pairs);
        assert_eq!(request.response_type, "code");
        assert_eq!(request.client_id, "c1");
        assert_eq!(request.scope.as_deref(), Some("openid email"));
        assert_eq!(request.redirect_uri, None);
    }
}
