//! User directory: the collaborator that owns accounts, passwords and lockout.
//!
//! The token core only ever sees a [`Principal`] produced after a successful
//! login; everything else about users stays behind [`UserDirectory`].

use crate::config::LockoutConfig;
use crate::entity::oauth2_user;
use crate::error::DirectoryError;
use crate::oauth2::password::{check_password_policy, hash_password, verify_password};
use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    SqlErr, sea_query::Expr,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// An authenticated subject, opaque to the token core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub username: String,
    /// Claims copied into issued tokens
    #[serde(default)]
    pub claims: Map<String, Value>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, username: impl Into<String>) -> Self {
        let username = username.into();
        let mut claims = Map::new();
        claims.insert("name".into(), Value::String(username.clone()));
        Self {
            subject: subject.into(),
            username,
            claims,
        }
    }
}

impl From<&oauth2_user::Model> for Principal {
    fn from(user: &oauth2_user::Model) -> Self {
        Principal::new(user.id.clone(), user.username.clone())
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<oauth2_user::Model>, DirectoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<oauth2_user::Model>, DirectoryError>;

    fn verify_password(&self, user: &oauth2_user::Model, password: &str) -> bool;

    fn is_locked_out(&self, user: &oauth2_user::Model, now: OffsetDateTime) -> bool;

    /// Count a failed login; locks the account once the threshold is reached.
    /// Returns true when this attempt triggered a lockout.
    async fn record_failed_attempt(
        &self,
        user: &oauth2_user::Model,
        now: OffsetDateTime,
    ) -> Result<bool, DirectoryError>;

    async fn record_successful_login(
        &self,
        user: &oauth2_user::Model,
        now: OffsetDateTime,
    ) -> Result<(), DirectoryError>;
}

/// SeaORM-backed directory over the `oauth2_user` table.
#[derive(Clone)]
pub struct DbUserDirectory {
    db: Arc<DatabaseConnection>,
    lockout: LockoutConfig,
}

impl DbUserDirectory {
    pub fn new(db: Arc<DatabaseConnection>, lockout: LockoutConfig) -> Self {
        Self { db, lockout }
    }

    /// Create an account. The password must satisfy the account policy.
    #[tracing::instrument(skip(self, password))]
    pub async fn create_user(
        &self,
        email: &str,
        username: &str,
        password: &str,
        email_verified: bool,
    ) -> Result<oauth2_user::Model, DirectoryError> {
        check_password_policy(password).map_err(DirectoryError::WeakPassword)?;
        let password_hash =
            hash_password(password).map_err(|e| DirectoryError::Hashing(e.to_string()))?;

        let user = oauth2_user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            email: Set(email.to_lowercase()),
            username: Set(username.to_string()),
            email_verified: Set(email_verified),
            password_hash: Set(Some(password_hash)),
            failed_login_count: Set(0),
            lockout_end: Set(None),
            created_at: Set(OffsetDateTime::now_utc()),
            last_login_at: Set(None),
        };

        match user.insert(self.db.as_ref()).await {
            Ok(user) => Ok(user),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(DirectoryError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<Option<oauth2_user::Model>, DirectoryError> {
        Ok(oauth2_user::Entity::find()
            .filter(oauth2_user::Column::Email.eq(email.to_lowercase()))
            .one(self.db.as_ref())
            .await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<oauth2_user::Model>, DirectoryError> {
        Ok(oauth2_user::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    fn verify_password(&self, user: &oauth2_user::Model, password: &str) -> bool {
        user.password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(password, hash))
    }

    fn is_locked_out(&self, user: &oauth2_user::Model, now: OffsetDateTime) -> bool {
        user.is_locked_out_at(now)
    }

    async fn record_failed_attempt(
        &self,
        user: &oauth2_user::Model,
        now: OffsetDateTime,
    ) -> Result<bool, DirectoryError> {
        oauth2_user::Entity::update_many()
            .col_expr(
                oauth2_user::Column::FailedLoginCount,
                Expr::col(oauth2_user::Column::FailedLoginCount).add(1),
            )
            .filter(oauth2_user::Column::Id.eq(&user.id))
            .exec(self.db.as_ref())
            .await?;

        let Some(current) = self.find_by_id(&user.id).await? else {
            return Ok(false);
        };
        if current.failed_login_count < self.lockout.max_failed_attempts {
            return Ok(false);
        }

        let mut active: oauth2_user::ActiveModel = current.into();
        active.failed_login_count = Set(0);
        active.lockout_end = Set(Some(now + Duration::seconds(self.lockout.lockout_duration)));
        active.update(self.db.as_ref()).await?;
        tracing::warn!(user_id = %user.id, "Account locked after repeated failed logins");
        Ok(true)
    }

    async fn record_successful_login(
        &self,
        user: &oauth2_user::Model,
        now: OffsetDateTime,
    ) -> Result<(), DirectoryError> {
        let mut active: oauth2_user::ActiveModel = user.clone().into();
        active.failed_login_count = Set(0);
        active.lockout_end = Set(None);
        active.last_login_at = Set(Some(now));
        active.update(self.db.as_ref()).await?;
        Ok(())
    }
}
