//! Demo protected resource guarded by a Bearer access token.

use crate::error::{ErrorResponse, OAuthError, VerificationError};
use crate::oauth2::OAuth2State;
use crate::oauth2::codec::TokenClaims;
use axum::{
    Json,
    extract::State,
    http::{HeaderMap, header},
};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const VAULT_TAG: &str = "Vault";

#[derive(Debug, Serialize, ToSchema)]
pub struct SecretResponse {
    pub message: String,
    /// `name` claim of the token, when present
    pub user: Option<String>,
    pub secret_data: String,
    pub your_claims: TokenClaims,
}

pub fn router(state: OAuth2State) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(secret))
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Return the vault contents to holders of a valid access token.
#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/api/secret",
    tag = VAULT_TAG,
    operation_id = "Get Secret",
    summary = "Read the protected demo resource",
    description = "Requires an access token issued by this server, sent as `Authorization: Bearer`. \
                   Identity tokens are rejected. Echoes the verified claims.",
    security(("OAuth2" = [])),
    responses(
        (status = 200, description = "Access granted", body = SecretResponse),
        (status = 401, description = "Missing, invalid or expired access token", body = ErrorResponse),
    )
)]
pub async fn secret(
    State(state): State<OAuth2State>,
    headers: HeaderMap,
) -> Result<Json<SecretResponse>, OAuthError> {
    let token = bearer_token(&headers).ok_or(VerificationError::Malformed)?;
    let claims = state
        .codec
        .verify_access_token(token, None)
        .inspect_err(|e| tracing::debug!(error = %e, "Rejected access token"))?;

    let user = claims
        .extra
        .get("name")
        .and_then(|v| v.as_str())
        .map(String::from);
    tracing::info!(subject = %claims.sub, "Vault accessed");

    Ok(Json(SecretResponse {
        message: "Access to the vault granted".to_string(),
        user,
        secret_data: "The formula is: [REDACTED]".to_string(),
        your_claims: claims,
    }))
}
