use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Description sent for every `invalid_grant`, whatever the underlying cause.
pub const INVALID_GRANT_DESCRIPTION: &str = "The specified grant is invalid, expired or revoked.";

/// Errors surfaced by the authorization and token engines.
///
/// Engines return these; the HTTP boundary maps each to an OAuth2 error code
/// and status. `InvalidGrant` is deliberately coarse.
#[derive(Debug, Error)]
pub enum OAuthError {
    /// The caller must send the user to the login page; not a failure.
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Client authentication failed")]
    InvalidClient,
    #[error("Redirect URI is not registered for this client")]
    InvalidRedirectUri,
    #[error("Requested scope is not allowed")]
    InvalidScope,
    #[error("PKCE with code_challenge_method=S256 is required")]
    PkceRequired,
    #[error("Invalid grant")]
    InvalidGrant,
    #[error("Client is not allowed to use this grant type")]
    UnauthorizedClient,
    #[error("Unsupported grant type")]
    UnsupportedGrantType,
    #[error("Unsupported response type")]
    UnsupportedResponseType,
    #[error("Backing store unavailable")]
    StoreUnavailable,
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OAuthError {
    /// The standard OAuth2 error code for the wire.
    pub fn error_code(&self) -> &'static str {
        match self {
            OAuthError::AuthenticationRequired => "login_required",
            OAuthError::InvalidRequest(_)
            | OAuthError::InvalidRedirectUri
            | OAuthError::PkceRequired => "invalid_request",
            OAuthError::InvalidClient => "invalid_client",
            OAuthError::InvalidScope => "invalid_scope",
            OAuthError::InvalidGrant => "invalid_grant",
            OAuthError::UnauthorizedClient => "unauthorized_client",
            OAuthError::UnsupportedGrantType => "unsupported_grant_type",
            OAuthError::UnsupportedResponseType => "unsupported_response_type",
            OAuthError::StoreUnavailable => "temporarily_unavailable",
            OAuthError::Verification(_) => "invalid_token",
            OAuthError::Internal(_) => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            OAuthError::AuthenticationRequired
            | OAuthError::InvalidClient
            | OAuthError::Verification(_) => StatusCode::UNAUTHORIZED,
            OAuthError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            OAuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Human-readable description. Never distinguishes grant failures.
    pub fn description(&self) -> Option<String> {
        match self {
            OAuthError::InvalidGrant => Some(INVALID_GRANT_DESCRIPTION.to_string()),
            OAuthError::InvalidRequest(msg) => Some(msg.clone()),
            OAuthError::Internal(_) | OAuthError::StoreUnavailable => None,
            OAuthError::Verification(_) => Some("The access token is invalid".to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            error_description: self.description(),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(self.to_response_body())).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        match self {
            OAuthError::InvalidClient => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"fortress-id\""),
                );
            }
            OAuthError::Verification(_) => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer error=\"invalid_token\""),
                );
            }
            OAuthError::StoreUnavailable => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}

/// OAuth2 error response body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Token verification failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Token is malformed")]
    Malformed,
    #[error("Token signature is invalid")]
    InvalidSignature,
    #[error("Token issuer does not match")]
    InvalidIssuer,
    #[error("Token audience does not match")]
    InvalidAudience,
    #[error("Token has expired")]
    Expired,
    #[error("Token is not of the expected type")]
    WrongTokenType,
}

/// Client registry failures.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Client not found")]
    ClientNotFound,
    #[error("Client secret is invalid")]
    InvalidSecret,
    #[error("Invalid redirect URI: {0}")]
    InvalidRedirectUri(String),
    #[error("Client {0} already exists")]
    AlreadyExists(String),
    #[error("Secret hashing failed: {0}")]
    Hashing(String),
    #[error("Store error: {0}")]
    Store(#[from] sea_orm::DbErr),
}

impl From<RegistryError> for OAuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ClientNotFound | RegistryError::InvalidSecret => OAuthError::InvalidClient,
            RegistryError::InvalidRedirectUri(_) => OAuthError::InvalidRedirectUri,
            RegistryError::AlreadyExists(id) => {
                OAuthError::InvalidRequest(format!("client {id} already exists"))
            }
            RegistryError::Hashing(e) => OAuthError::Internal(e),
            RegistryError::Store(e) => {
                tracing::error!(error = %e, "Client registry store error");
                OAuthError::StoreUnavailable
            }
        }
    }
}

/// Grant store failures. Callers collapse everything except `Unavailable`
/// into `InvalidGrant`.
#[derive(Debug, Error)]
pub enum GrantStoreError {
    #[error("Grant not found")]
    NotFound,
    #[error("Authorization code already consumed")]
    AlreadyConsumed { family_id: String },
    #[error("Grant expired")]
    Expired,
    #[error("Refresh token revoked")]
    Revoked { family_id: String },
    #[error("Store unavailable: {0}")]
    Unavailable(#[from] sea_orm::DbErr),
}

impl From<GrantStoreError> for OAuthError {
    fn from(err: GrantStoreError) -> Self {
        match err {
            GrantStoreError::Unavailable(e) => {
                tracing::error!(error = %e, "Grant store error");
                OAuthError::StoreUnavailable
            }
            _ => OAuthError::InvalidGrant,
        }
    }
}

/// Failures loading or generating the signing key. Fatal at startup.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read signing key {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid signing key: {0}")]
    Invalid(String),
    #[error("No signing key configured")]
    Missing,
    #[error("Random number generator failure: {0}")]
    Rng(#[from] getrandom::Error),
}

/// User directory failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("A user with this email already exists")]
    DuplicateEmail,
    #[error("Password does not meet the policy: {0}")]
    WeakPassword(String),
    #[error("Password hashing failed: {0}")]
    Hashing(String),
    #[error("Store error: {0}")]
    Store(#[from] sea_orm::DbErr),
}

/// Failures while seeding development data.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
