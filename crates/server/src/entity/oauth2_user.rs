//! OAuth2 User entity - the user directory behind the login form.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "oauth2_user")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(unique)]
    pub email: String,
    pub username: String,
    pub email_verified: bool,
    /// Argon2id PHC hash
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub failed_login_count: i32,
    pub lockout_end: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_locked_out_at(&self, now: OffsetDateTime) -> bool {
        self.lockout_end.is_some_and(|end| end > now)
    }
}
