//! Authorization Engine: turns an authenticated authorization request into a
//! one-time authorization code.

use crate::entity::{oauth2_authorization, oauth2_client};
use crate::error::OAuthError;
use crate::oauth2::directory::Principal;
use crate::oauth2::grant_store::GrantStore;
use crate::oauth2::password::generate_token;
use crate::oauth2::pkce;
use crate::oauth2::registry::ClientRegistry;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use utoipa::{IntoParams, ToSchema};

pub const RESPONSE_TYPE_CODE: &str = "code";

/// Authorization request parameters as received from the user agent.
#[derive(Debug, Clone, Default, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizationRequest {
    /// Must be `code`
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub client_id: String,
    /// Must exactly match a registered redirect URI
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Opaque value returned unchanged in the redirect
    pub state: Option<String>,
    /// Echoed in the identity token
    pub nonce: Option<String>,
    /// Base64url SHA-256 of the code verifier
    pub code_challenge: Option<String>,
    /// Must be `S256`
    pub code_challenge_method: Option<String>,
}

impl AuthorizationRequest {
    pub fn requested_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for scope in self.scope.as_deref().unwrap_or_default().split_whitespace() {
            if !scopes.iter().any(|s| s == scope) {
                scopes.push(scope.to_string());
            }
        }
        scopes
    }
}

/// A stored code ready to be delivered to the client's redirect URI.
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: OffsetDateTime,
}

impl IssuedCode {
    /// The redirect URI with `code` and `state` appended.
    pub fn redirect_location(&self) -> Result<String, OAuthError> {
        let mut url = url::Url::parse(&self.redirect_uri)
            .map_err(|e| OAuthError::Internal(format!("stored redirect URI is invalid: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                query.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

#[derive(Clone)]
pub struct AuthorizationEngine {
    registry: ClientRegistry,
    store: GrantStore,
    code_lifetime: Duration,
}

impl AuthorizationEngine {
    pub fn new(registry: ClientRegistry, store: GrantStore, code_lifetime: Duration) -> Self {
        Self {
            registry,
            store,
            code_lifetime,
        }
    }

    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
        principal: Option<&Principal>,
    ) -> Result<IssuedCode, OAuthError> {
        self.authorize_at(request, principal, OffsetDateTime::now_utc())
            .await
    }

    #[tracing::instrument(
        skip(self, request, principal, now),
        fields(client_id = %request.client_id, subject = principal.map(|p| p.subject.as_str()))
    )]
    pub async fn authorize_at(
        &self,
        request: &AuthorizationRequest,
        principal: Option<&Principal>,
        now: OffsetDateTime,
    ) -> Result<IssuedCode, OAuthError> {
        let Some(principal) = principal else {
            return Err(OAuthError::AuthenticationRequired);
        };

        let client = self.resolve_client(request).await?;
        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .filter(|uri| ClientRegistry::validate_redirect_uri(&client, uri))
            .ok_or(OAuthError::InvalidRedirectUri)?;

        if request.response_type != RESPONSE_TYPE_CODE {
            return Err(OAuthError::UnsupportedResponseType);
        }
        if !client.is_grant_type_allowed(oauth2_client::GRANT_AUTHORIZATION_CODE) {
            return Err(OAuthError::UnauthorizedClient);
        }

        let scopes = request.requested_scopes();
        if let Some(denied) = scopes.iter().find(|s| !client.is_scope_allowed(s)) {
            tracing::debug!(scope = %denied, "Requested scope not allowed for client");
            return Err(OAuthError::InvalidScope);
        }

        let code_challenge = pkce::require_s256(
            request.code_challenge.as_deref(),
            request.code_challenge_method.as_deref(),
        )?;

        let code = generate_token().map_err(|e| OAuthError::Internal(e.to_string()))?;
        let family_id = generate_token().map_err(|e| OAuthError::Internal(e.to_string()))?;
        let claims = serde_json::to_string(&principal.claims)
            .map_err(|e| OAuthError::Internal(e.to_string()))?;
        let expires_at = now + self.code_lifetime;

        self.store
            .put_code(oauth2_authorization::Model {
                code: code.clone(),
                client_id: client.id.clone(),
                user_id: principal.subject.clone(),
                redirect_uri: redirect_uri.to_string(),
                scope: scopes.join(" "),
                claims,
                nonce: request.nonce.clone(),
                code_challenge,
                code_challenge_method: pkce::METHOD_S256.to_string(),
                family_id,
                expires_at,
                consumed_at: None,
                created_at: now,
            })
            .await?;

        tracing::info!("Issued authorization code");
        Ok(IssuedCode {
            code,
            redirect_uri: redirect_uri.to_string(),
            state: request.state.clone(),
            scopes,
            expires_at,
        })
    }

    async fn resolve_client(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<oauth2_client::Model, OAuthError> {
        if request.client_id.is_empty() {
            return Err(OAuthError::InvalidClient);
        }
        self.registry
            .lookup(&request.client_id)
            .await?
            .ok_or(OAuthError::InvalidClient)
    }
}
