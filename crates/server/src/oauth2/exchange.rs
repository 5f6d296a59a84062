//! Token Exchange Engine: redeems authorization codes and rotates refresh
//! tokens into new token sets.
//!
//! Every grant failure leaves this module as [`OAuthError::InvalidGrant`];
//! the cause is only visible in debug logs.

use crate::config::OAuth2Config;
use crate::entity::{oauth2_client, split_scopes};
use crate::error::{GrantStoreError, OAuthError};
use crate::oauth2::codec::{GrantClaims, TokenCodec};
use crate::oauth2::grant_store::{GrantStore, NewFamily};
use crate::oauth2::password::generate_token;
use crate::oauth2::pkce;
use crate::oauth2::registry::ClientRegistry;
use serde::Serialize;
use serde_json::{Map, Value};
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

pub const SCOPE_OPENID: &str = "openid";

/// Credentials presented by the client at the token endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Successful token response.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenSet {
    pub access_token: String,
    /// Always `Bearer`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

#[derive(Debug, Clone, Copy)]
struct Lifetimes {
    access: Duration,
    identity: Duration,
    refresh: Duration,
}

#[derive(Clone)]
pub struct TokenExchangeEngine {
    registry: ClientRegistry,
    store: GrantStore,
    codec: TokenCodec,
    lifetimes: Lifetimes,
}

impl TokenExchangeEngine {
    pub fn new(
        registry: ClientRegistry,
        store: GrantStore,
        codec: TokenCodec,
        config: &OAuth2Config,
    ) -> Self {
        Self {
            registry,
            store,
            codec,
            lifetimes: Lifetimes {
                access: Duration::seconds(config.access_token_lifetime),
                identity: Duration::seconds(config.identity_token_lifetime),
                refresh: Duration::seconds(config.refresh_token_lifetime),
            },
        }
    }

    async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
        grant_type: &str,
    ) -> Result<oauth2_client::Model, OAuthError> {
        let client = self
            .registry
            .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
            .await
            .inspect_err(|e| tracing::debug!(error = %e, "Client authentication failed"))?;
        if !client.is_grant_type_allowed(grant_type) {
            return Err(OAuthError::UnauthorizedClient);
        }
        Ok(client)
    }

    pub async fn redeem_code(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet, OAuthError> {
        self.redeem_code_at(credentials, code, redirect_uri, code_verifier, OffsetDateTime::now_utc())
            .await
    }

    /// Redeem an authorization code. The code is consumed before the
    /// redirect URI and PKCE verifier are checked, so a failed attempt
    /// still burns it.
    #[tracing::instrument(
        skip(self, credentials, code, redirect_uri, code_verifier, now),
        fields(client_id = %credentials.client_id)
    )]
    pub async fn redeem_code_at(
        &self,
        credentials: &ClientCredentials,
        code: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<TokenSet, OAuthError> {
        let client = self
            .authenticate_client(credentials, oauth2_client::GRANT_AUTHORIZATION_CODE)
            .await?;

        let grant = match self.store.take_code(code, now).await {
            Ok(grant) => grant,
            Err(GrantStoreError::AlreadyConsumed { family_id }) => {
                tracing::warn!(
                    client_id = %client.id,
                    family_id = %family_id,
                    "Authorization code replayed, revoking token family"
                );
                self.store.revoke_family(&family_id, now).await?;
                return Err(OAuthError::InvalidGrant);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Authorization code rejected");
                return Err(e.into());
            }
        };

        if grant.client_id != client.id {
            tracing::debug!("Authorization code was issued to another client");
            return Err(OAuthError::InvalidGrant);
        }
        if redirect_uri != Some(grant.redirect_uri.as_str()) {
            tracing::debug!("Redirect URI does not match the authorization request");
            return Err(OAuthError::InvalidGrant);
        }
        if !code_verifier.is_some_and(|v| pkce::verify(v, &grant.code_challenge)) {
            tracing::debug!("PKCE verification failed");
            return Err(OAuthError::InvalidGrant);
        }

        let scopes = grant.scopes_list();
        let claims = GrantClaims {
            subject: grant.user_id.clone(),
            client_id: client.id.clone(),
            scopes: scopes.clone(),
            claims: parse_claims(&grant.claims)?,
            nonce: grant.nonce.clone(),
        };

        let refresh_token = if client.is_grant_type_allowed(oauth2_client::GRANT_REFRESH_TOKEN) {
            let token_id = new_token()?;
            let issued = self
                .store
                .create_family(
                    NewFamily {
                        family_id: grant.family_id.clone(),
                        client_id: client.id.clone(),
                        user_id: grant.user_id.clone(),
                        scope: grant.scope.clone(),
                        claims: grant.claims.clone(),
                        token_id,
                        expires_at: self.refresh_expiry(now)?,
                    },
                    now,
                )
                .await
                .inspect_err(|e| tracing::debug!(error = %e, "Could not open token family"))?;
            Some(issued.id)
        } else {
            None
        };

        tracing::info!(subject = %grant.user_id, "Redeemed authorization code");
        self.issue(&claims, refresh_token, now)
    }

    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenSet, OAuthError> {
        self.refresh_at(credentials, refresh_token, scope, OffsetDateTime::now_utc())
            .await
    }

    /// Rotate a refresh token. Presenting a token that was already rotated
    /// or revoked revokes its whole family.
    #[tracing::instrument(
        skip(self, credentials, refresh_token, now),
        fields(client_id = %credentials.client_id)
    )]
    pub async fn refresh_at(
        &self,
        credentials: &ClientCredentials,
        refresh_token: &str,
        scope: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<TokenSet, OAuthError> {
        let client = self
            .authenticate_client(credentials, oauth2_client::GRANT_REFRESH_TOKEN)
            .await?;

        let narrowed = match scope.map(split_scopes) {
            Some(requested) if !requested.is_empty() => {
                let current = self
                    .store
                    .find_refresh_token(refresh_token)
                    .await?
                    .filter(|t| t.client_id == client.id)
                    .ok_or(OAuthError::InvalidGrant)?;
                // Reuse and expiry take precedence over the scope check
                if current.is_revoked() {
                    return Err(self.reject_reuse(&client.id, &current.family_id, now).await);
                }
                if current.is_expired_at(now) {
                    tracing::debug!("Refresh token expired");
                    return Err(OAuthError::InvalidGrant);
                }
                let granted = current.scopes_list();
                if requested.iter().any(|s| !granted.contains(s)) {
                    return Err(OAuthError::InvalidScope);
                }
                Some(requested)
            }
            _ => None,
        };

        let successor_id = new_token()?;
        let rotated = self
            .store
            .rotate_refresh_token(
                refresh_token,
                &client.id,
                successor_id,
                self.refresh_expiry(now)?,
                now,
            )
            .await;

        let (_, successor) = match rotated {
            Ok(pair) => pair,
            Err(GrantStoreError::Revoked { family_id }) => {
                return Err(self.reject_reuse(&client.id, &family_id, now).await);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Refresh token rejected");
                return Err(e.into());
            }
        };

        let claims = GrantClaims {
            subject: successor.user_id.clone(),
            client_id: client.id.clone(),
            scopes: narrowed.unwrap_or_else(|| successor.scopes_list()),
            claims: parse_claims(&successor.claims)?,
            nonce: None,
        };
        tracing::info!(subject = %successor.user_id, family_id = %successor.family_id, "Rotated refresh token");
        self.issue(&claims, Some(successor.id), now)
    }

    /// Revoke a refresh token's family on behalf of the client that owns it
    /// (RFC 7009). Unknown tokens and access tokens succeed silently.
    #[tracing::instrument(skip(self, credentials, token), fields(client_id = %credentials.client_id))]
    pub async fn revoke(&self, credentials: &ClientCredentials, token: &str) -> Result<(), OAuthError> {
        let client = self
            .registry
            .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
            .await?;

        match self.store.find_refresh_token(token).await? {
            Some(found) if found.client_id == client.id => {
                self.store
                    .revoke_family(&found.family_id, OffsetDateTime::now_utc())
                    .await?;
                tracing::info!(family_id = %found.family_id, "Revoked token family on client request");
            }
            Some(_) => tracing::debug!("Revocation requested for another client's token"),
            None => {}
        }
        Ok(())
    }

    /// Revoke the family of a reused refresh token. The caller always sees
    /// `InvalidGrant` unless the revocation itself could not be stored.
    async fn reject_reuse(&self, client_id: &str, family_id: &str, now: OffsetDateTime) -> OAuthError {
        tracing::warn!(
            client_id = %client_id,
            family_id = %family_id,
            "Refresh token reuse detected, revoking token family"
        );
        match self.store.revoke_family(family_id, now).await {
            Ok(()) => OAuthError::InvalidGrant,
            Err(e) => e.into(),
        }
    }

    fn refresh_expiry(&self, now: OffsetDateTime) -> Result<OffsetDateTime, OAuthError> {
        now.checked_add(self.lifetimes.refresh)
            .ok_or_else(|| OAuthError::Internal("refresh token lifetime is out of range".into()))
    }

    fn issue(
        &self,
        claims: &GrantClaims,
        refresh_token: Option<String>,
        now: OffsetDateTime,
    ) -> Result<TokenSet, OAuthError> {
        let access_token = self
            .codec
            .sign_access_token(claims, self.lifetimes.access, now)
            .map_err(|e| OAuthError::Internal(format!("failed to sign access token: {e}")))?;

        let id_token = if claims.scopes.iter().any(|s| s == SCOPE_OPENID) {
            Some(
                self.codec
                    .sign_identity_token(claims, self.lifetimes.identity, now)
                    .map_err(|e| OAuthError::Internal(format!("failed to sign identity token: {e}")))?,
            )
        } else {
            None
        };

        Ok(TokenSet {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.lifetimes.access.whole_seconds(),
            refresh_token,
            id_token,
            scope: claims.scopes.join(" "),
        })
    }
}

fn parse_claims(raw: &str) -> Result<Map<String, Value>, OAuthError> {
    serde_json::from_str(raw).map_err(|e| OAuthError::Internal(format!("stored claims are invalid: {e}")))
}

fn new_token() -> Result<String, OAuthError> {
    generate_token().map_err(|e| OAuthError::Internal(e.to_string()))
}
