//! Token Codec: signs and verifies access and identity tokens.
//!
//! Tokens are compact JWS signed with Ed25519 (`EdDSA`). The private key never
//! leaves this component; the public half is published as a JWK set.
//! Which claims land in which token is decided by [`destination_for`].

use crate::config::AppConfig;
use crate::error::{KeyError, VerificationError};
use base64::Engine;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use utoipa::ToSchema;

/// `typ` header of access tokens (RFC 9068).
pub const ACCESS_TOKEN_TYPE: &str = "at+jwt";
/// `typ` header of identity tokens.
pub const IDENTITY_TOKEN_TYPE: &str = "JWT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Identity,
}

impl TokenKind {
    fn typ(self) -> &'static str {
        match self {
            TokenKind::Access => ACCESS_TOKEN_TYPE,
            TokenKind::Identity => IDENTITY_TOKEN_TYPE,
        }
    }
}

/// Where a claim is allowed to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Access,
    Identity,
    Both,
}

impl Destination {
    pub fn includes(self, kind: TokenKind) -> bool {
        matches!(
            (self, kind),
            (Destination::Both, _)
                | (Destination::Access, TokenKind::Access)
                | (Destination::Identity, TokenKind::Identity)
        )
    }
}

/// Claim routing table. The subject is the only claim carried by both
/// tokens; OpenID protocol claims stay in the identity token and every
/// other principal claim goes to the access token.
pub fn destination_for(claim: &str) -> Destination {
    match claim {
        "sub" => Destination::Both,
        "nonce" | "auth_time" | "at_hash" => Destination::Identity,
        _ => Destination::Access,
    }
}

/// The inputs a token is derived from.
#[derive(Debug, Clone, Default)]
pub struct GrantClaims {
    pub subject: String,
    /// Becomes the `aud` claim.
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Additional principal claims, e.g. `name`.
    pub claims: Map<String, Value>,
    pub nonce: Option<String>,
}

/// Decoded claim set of a verified token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .map(crate::entity::split_scopes)
            .unwrap_or_default()
    }
}

/// A single Ed25519 public key in JWK form (RFC 8037).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    pub x: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    public_x: String,
}

#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<Keys>,
    issuer: String,
    key_id: String,
    clock_skew: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        signing_key: &SigningKey,
        issuer: impl Into<String>,
        key_id: impl Into<String>,
        clock_skew: Duration,
    ) -> Result<Self, KeyError> {
        let der = signing_key
            .to_pkcs8_der()
            .map_err(|e| KeyError::Invalid(e.to_string()))?;
        let public_x = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(signing_key.verifying_key().as_bytes());
        let decoding = DecodingKey::from_ed_components(&public_x)
            .map_err(|e| KeyError::Invalid(e.to_string()))?;

        Ok(Self {
            keys: Arc::new(Keys {
                encoding: EncodingKey::from_ed_der(der.as_bytes()),
                decoding,
                public_x,
            }),
            issuer: issuer.into(),
            key_id: key_id.into(),
            clock_skew,
        })
    }

    /// Build the codec from configuration: load the PKCS#8 PEM key if a path
    /// is set, otherwise generate an ephemeral key when allowed.
    pub fn from_config(config: &AppConfig) -> Result<Self, KeyError> {
        let signing_key = match (&config.oauth2.signing_key_path, config.oauth2.generate_signing_key) {
            (Some(path), _) => load_signing_key(path)?,
            (None, true) => {
                tracing::warn!("No signing key configured, generating an ephemeral Ed25519 key");
                generate_signing_key()?
            }
            (None, false) => return Err(KeyError::Missing),
        };
        Self::new(
            &signing_key,
            config.issuer(),
            config.oauth2.key_id.clone(),
            Duration::seconds(config.oauth2.clock_skew),
        )
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn sign_access_token(
        &self,
        grant: &GrantClaims,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.sign(TokenKind::Access, grant, ttl, now)
    }

    pub fn sign_identity_token(
        &self,
        grant: &GrantClaims,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        self.sign(TokenKind::Identity, grant, ttl, now)
    }

    fn sign(
        &self,
        kind: TokenKind,
        grant: &GrantClaims,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = self.claims_for(kind, grant, ttl, now);
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some(kind.typ().to_string());
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, &claims, &self.keys.encoding)
    }

    fn claims_for(
        &self,
        kind: TokenKind,
        grant: &GrantClaims,
        ttl: Duration,
        now: OffsetDateTime,
    ) -> TokenClaims {
        let extra = grant
            .claims
            .iter()
            .filter(|(name, _)| !is_registered_claim(name))
            .filter(|(name, _)| destination_for(name).includes(kind))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let scope = destination_for("scope").includes(kind).then(|| grant.scopes.join(" "));
        let nonce = grant
            .nonce
            .clone()
            .filter(|_| destination_for("nonce").includes(kind));

        TokenClaims {
            iss: self.issuer.clone(),
            sub: grant.subject.clone(),
            aud: grant.client_id.clone(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope,
            nonce,
            extra,
        }
    }

    /// Verify a token of any kind at the current time.
    pub fn verify(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<TokenClaims, VerificationError> {
        self.verify_at(token, audience, OffsetDateTime::now_utc())
    }

    /// Verify signature, issuer, audience (when given) and expiry. A token is
    /// accepted until `exp + clock_skew` inclusive.
    pub fn verify_at(
        &self,
        token: &str,
        audience: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<TokenClaims, VerificationError> {
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.keys.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    VerificationError::InvalidSignature
                }
                _ => VerificationError::Malformed,
            })?;
        let claims = data.claims;

        if claims.iss != self.issuer {
            return Err(VerificationError::InvalidIssuer);
        }
        if audience.is_some_and(|aud| aud != claims.aud) {
            return Err(VerificationError::InvalidAudience);
        }
        if now.unix_timestamp() > claims.exp + self.clock_skew.whole_seconds() {
            return Err(VerificationError::Expired);
        }
        Ok(claims)
    }

    /// Verify a token and require it to be an access token.
    pub fn verify_access_token(
        &self,
        token: &str,
        audience: Option<&str>,
    ) -> Result<TokenClaims, VerificationError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| VerificationError::Malformed)?;
        if header.typ.as_deref() != Some(ACCESS_TOKEN_TYPE) {
            return Err(VerificationError::WrongTokenType);
        }
        self.verify(token, audience)
    }

    /// Public verification material for resource servers.
    pub fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![Jwk {
                kty: "OKP".into(),
                crv: "Ed25519".into(),
                key_use: "sig".into(),
                alg: "EdDSA".into(),
                kid: self.key_id.clone(),
                x: self.keys.public_x.clone(),
            }],
        }
    }
}

fn is_registered_claim(name: &str) -> bool {
    matches!(
        name,
        "iss" | "sub" | "aud" | "iat" | "exp" | "jti" | "scope" | "nonce" | "nbf"
    )
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey, KeyError> {
    let pem = std::fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.display().to_string(),
        source,
    })?;
    SigningKey::from_pkcs8_pem(&pem).map_err(|e| KeyError::Invalid(e.to_string()))
}

pub fn generate_signing_key() -> Result<SigningKey, KeyError> {
    let mut seed = [0u8; 32];
    getrandom::fill(&mut seed)?;
    Ok(SigningKey::from_bytes(&seed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_the_only_claim_routed_to_both_tokens() {
        assert_eq!(destination_for("sub"), Destination::Both);
        assert_eq!(destination_for("name"), Destination::Access);
        assert_eq!(destination_for("scope"), Destination::Access);
        assert_eq!(destination_for("nonce"), Destination::Identity);
        assert!(Destination::Both.includes(TokenKind::Identity));
        assert!(!Destination::Access.includes(TokenKind::Identity));
    }

    #[test]
    fn jwks_exposes_the_public_key() {
        let key = generate_signing_key().unwrap();
        let codec = TokenCodec::new(&key, "https://id.test", "k1", Duration::seconds(60)).unwrap();
        let jwks = codec.jwks();
        assert_eq!(jwks.keys.len(), 1);
        let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(&jwks.keys[0].x)
            .unwrap();
        assert_eq!(decoded, key.verifying_key().as_bytes());
        assert_eq!(jwks.keys[0].kid, "k1");
    }
}
