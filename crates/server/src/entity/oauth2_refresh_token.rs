//! OAuth2 Refresh Token entity - opaque reference tokens, rotated on every use.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_refresh_token")]
pub struct Model {
    /// The opaque token value handed to the client
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub family_id: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    /// JSON object of principal claims carried across rotations
    pub claims: String,
    pub expires_at: OffsetDateTime,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::oauth2_token_family::Entity",
        from = "Column::FamilyId",
        to = "super::oauth2_token_family::Column::Id"
    )]
    Family,
}

impl Related<super::oauth2_token_family::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Family.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Active means neither revoked nor expired.
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.is_revoked() && !self.is_expired_at(now)
    }

    pub fn scopes_list(&self) -> Vec<String> {
        super::split_scopes(&self.scope)
    }
}
