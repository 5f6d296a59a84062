//! OAuth2 Client entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_client")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Argon2id PHC hash of the client secret (None for public clients)
    #[serde(skip_serializing)]
    pub secret_hash: Option<String>,
    /// Human-readable client name
    pub name: String,
    /// JSON array of canonicalized redirect URIs
    pub redirect_uris: String,
    /// Space-separated list of allowed grant types
    pub grant_types: String,
    /// Space-separated list of allowed scopes
    pub scopes: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Public clients have no secret to prove their identity at the token endpoint.
    pub fn is_public(&self) -> bool {
        self.secret_hash.is_none()
    }

    /// Parse redirect URIs from JSON string
    pub fn redirect_uris_list(&self) -> Vec<String> {
        serde_json::from_str(&self.redirect_uris).unwrap_or_default()
    }

    pub fn grant_types_list(&self) -> Vec<String> {
        super::split_scopes(&self.grant_types)
    }

    pub fn scopes_list(&self) -> Vec<String> {
        super::split_scopes(&self.scopes)
    }

    /// Exact string match against the registered (canonical) URIs.
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris_list()
            .iter()
            .any(|allowed| allowed == uri)
    }

    pub fn is_grant_type_allowed(&self, grant_type: &str) -> bool {
        self.grant_types_list().iter().any(|g| g == grant_type)
    }

    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.scopes_list().iter().any(|s| s == scope)
    }
}
