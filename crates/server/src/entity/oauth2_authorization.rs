//! OAuth2 Authorization Code entity - one-time codes exchanged for tokens.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_authorization")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub code: String,
    pub client_id: String,
    pub user_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// JSON object of principal claims captured at authorization time
    pub claims: String,
    /// OpenID Connect nonce
    pub nonce: Option<String>,
    pub code_challenge: String,
    /// Always S256
    pub code_challenge_method: String,
    /// Token family created when this code is redeemed
    pub family_id: String,
    pub expires_at: OffsetDateTime,
    pub consumed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn scopes_list(&self) -> Vec<String> {
        super::split_scopes(&self.scope)
    }
}
