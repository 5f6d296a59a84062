//! Persistence for authorization codes and refresh-token families.
//!
//! Every state transition is a single conditional statement or a single
//! transaction, so concurrent redemptions of the same code or rotations of
//! the same refresh token have exactly one winner. Any database failure is
//! reported as [`GrantStoreError::Unavailable`]; nothing here retries.

use crate::entity::{oauth2_authorization, oauth2_refresh_token, oauth2_token_family};
use crate::error::GrantStoreError;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, SqlErr, TransactionTrait,
    sea_query::{Expr, OnConflict, Query},
};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Minimum age of an empty family before it may be purged.
pub const FAMILY_PURGE_GRACE: Duration = Duration::minutes(10);

/// Everything needed to open a new refresh-token family at code redemption.
#[derive(Debug, Clone)]
pub struct NewFamily {
    pub family_id: String,
    pub client_id: String,
    pub user_id: String,
    pub scope: String,
    /// JSON object of principal claims
    pub claims: String,
    pub token_id: String,
    pub expires_at: OffsetDateTime,
}

/// Row counts removed by [`GrantStore::purge_expired`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PurgeStats {
    pub codes: u64,
    pub refresh_tokens: u64,
    pub families: u64,
}

#[derive(Clone)]
pub struct GrantStore {
    db: Arc<DatabaseConnection>,
}

impl GrantStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Persist a freshly minted authorization code.
    pub async fn put_code(&self, code: oauth2_authorization::Model) -> Result<(), GrantStoreError> {
        oauth2_authorization::ActiveModel {
            code: Set(code.code),
            client_id: Set(code.client_id),
            user_id: Set(code.user_id),
            redirect_uri: Set(code.redirect_uri),
            scope: Set(code.scope),
            claims: Set(code.claims),
            nonce: Set(code.nonce),
            code_challenge: Set(code.code_challenge),
            code_challenge_method: Set(code.code_challenge_method),
            family_id: Set(code.family_id),
            expires_at: Set(code.expires_at),
            consumed_at: Set(None),
            created_at: Set(code.created_at),
        }
        .insert(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Atomically consume a code. Exactly one caller can win for a given
    /// code; later callers get `AlreadyConsumed` carrying the family the
    /// first redemption created, so it can be revoked.
    pub async fn take_code(
        &self,
        code: &str,
        now: OffsetDateTime,
    ) -> Result<oauth2_authorization::Model, GrantStoreError> {
        let result = oauth2_authorization::Entity::update_many()
            .col_expr(oauth2_authorization::Column::ConsumedAt, Expr::value(now))
            .filter(oauth2_authorization::Column::Code.eq(code))
            .filter(oauth2_authorization::Column::ConsumedAt.is_null())
            .exec(self.db.as_ref())
            .await?;

        let model = oauth2_authorization::Entity::find_by_id(code)
            .one(self.db.as_ref())
            .await?
            .ok_or(GrantStoreError::NotFound)?;

        if result.rows_affected != 1 {
            return Err(GrantStoreError::AlreadyConsumed {
                family_id: model.family_id,
            });
        }
        if model.is_expired_at(now) {
            return Err(GrantStoreError::Expired);
        }
        Ok(model)
    }

    /// Create a family together with its first refresh token.
    ///
    /// Fails with `Revoked` when the family id is already taken, which only
    /// happens if a replay of the originating code revoked it first.
    pub async fn create_family(
        &self,
        family: NewFamily,
        now: OffsetDateTime,
    ) -> Result<oauth2_refresh_token::Model, GrantStoreError> {
        let txn = self.db.begin().await?;

        let inserted = oauth2_token_family::ActiveModel {
            id: Set(family.family_id.clone()),
            client_id: Set(family.client_id.clone()),
            user_id: Set(family.user_id.clone()),
            generation: Set(0),
            created_at: Set(now),
            revoked_at: Set(None),
        }
        .insert(&txn)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(GrantStoreError::Revoked {
                    family_id: family.family_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let token = oauth2_refresh_token::ActiveModel {
            id: Set(family.token_id),
            family_id: Set(family.family_id),
            client_id: Set(family.client_id),
            user_id: Set(family.user_id),
            scope: Set(family.scope),
            claims: Set(family.claims),
            expires_at: Set(family.expires_at),
            revoked_at: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(token)
    }

    /// Rotate a refresh token: revoke `presented` and issue `successor_id`
    /// in the same family, carrying the same scope and claims.
    ///
    /// The family row update is the per-family serialization point. Returns
    /// the presented token and its successor.
    pub async fn rotate_refresh_token(
        &self,
        presented: &str,
        client_id: &str,
        successor_id: String,
        successor_expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(oauth2_refresh_token::Model, oauth2_refresh_token::Model), GrantStoreError> {
        let txn = self.db.begin().await?;

        let old = oauth2_refresh_token::Entity::find_by_id(presented)
            .one(&txn)
            .await?
            .ok_or(GrantStoreError::NotFound)?;
        if old.client_id != client_id {
            return Err(GrantStoreError::NotFound);
        }
        if old.is_revoked() {
            return Err(GrantStoreError::Revoked {
                family_id: old.family_id,
            });
        }
        if old.is_expired_at(now) {
            return Err(GrantStoreError::Expired);
        }

        let family = oauth2_token_family::Entity::update_many()
            .col_expr(
                oauth2_token_family::Column::Generation,
                Expr::col(oauth2_token_family::Column::Generation).add(1),
            )
            .filter(oauth2_token_family::Column::Id.eq(&old.family_id))
            .filter(oauth2_token_family::Column::RevokedAt.is_null())
            .exec(&txn)
            .await?;
        if family.rows_affected != 1 {
            return Err(GrantStoreError::Revoked {
                family_id: old.family_id,
            });
        }

        let revoked = oauth2_refresh_token::Entity::update_many()
            .col_expr(oauth2_refresh_token::Column::RevokedAt, Expr::value(now))
            .filter(oauth2_refresh_token::Column::Id.eq(presented))
            .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
            .exec(&txn)
            .await?;
        if revoked.rows_affected != 1 {
            return Err(GrantStoreError::Revoked {
                family_id: old.family_id,
            });
        }

        let successor = oauth2_refresh_token::ActiveModel {
            id: Set(successor_id),
            family_id: Set(old.family_id.clone()),
            client_id: Set(old.client_id.clone()),
            user_id: Set(old.user_id.clone()),
            scope: Set(old.scope.clone()),
            claims: Set(old.claims.clone()),
            expires_at: Set(successor_expires_at),
            revoked_at: Set(None),
            created_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok((old, successor))
    }

    /// Revoke a family and every token in it.
    ///
    /// If the family does not exist yet (the code it descends from is still
    /// being redeemed), a revoked placeholder is written so the pending
    /// redemption cannot open it. Concurrent revocations of the same family
    /// all succeed.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str, now: OffsetDateTime) -> Result<(), GrantStoreError> {
        let txn = self.db.begin().await?;

        // Writing first takes the write lock before anything is read.
        let revoked = oauth2_token_family::Entity::update_many()
            .col_expr(oauth2_token_family::Column::RevokedAt, Expr::value(now))
            .filter(oauth2_token_family::Column::Id.eq(family_id))
            .filter(oauth2_token_family::Column::RevokedAt.is_null())
            .exec(&txn)
            .await?;

        if revoked.rows_affected == 0 {
            let origin = oauth2_authorization::Entity::find()
                .filter(oauth2_authorization::Column::FamilyId.eq(family_id))
                .one(&txn)
                .await?;
            let (client_id, user_id) = origin
                .map(|code| (code.client_id, code.user_id))
                .unwrap_or_default();
            // No-op when the family exists and is already revoked, or when
            // a concurrent revocation wrote the placeholder first.
            oauth2_token_family::Entity::insert(oauth2_token_family::ActiveModel {
                id: Set(family_id.to_string()),
                client_id: Set(client_id),
                user_id: Set(user_id),
                generation: Set(0),
                created_at: Set(now),
                revoked_at: Set(Some(now)),
            })
            .on_conflict(
                OnConflict::column(oauth2_token_family::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;
        }

        let tokens = oauth2_refresh_token::Entity::update_many()
            .col_expr(oauth2_refresh_token::Column::RevokedAt, Expr::value(now))
            .filter(oauth2_refresh_token::Column::FamilyId.eq(family_id))
            .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
            .exec(&txn)
            .await?;

        txn.commit().await?;
        tracing::debug!(tokens = tokens.rows_affected, "Revoked token family");
        Ok(())
    }

    pub async fn find_refresh_token(
        &self,
        id: &str,
    ) -> Result<Option<oauth2_refresh_token::Model>, GrantStoreError> {
        Ok(oauth2_refresh_token::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn find_family(
        &self,
        id: &str,
    ) -> Result<Option<oauth2_token_family::Model>, GrantStoreError> {
        Ok(oauth2_token_family::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await?)
    }

    /// Delete codes and refresh tokens that expired before `cutoff`, then
    /// families left without any tokens.
    ///
    /// A family is kept while a code still refers to it and for
    /// [`FAMILY_PURGE_GRACE`] after it was written, so a revoked placeholder
    /// outlives any redemption that was in flight when it was created.
    pub async fn purge_expired(&self, cutoff: OffsetDateTime) -> Result<PurgeStats, GrantStoreError> {
        let codes = oauth2_authorization::Entity::delete_many()
            .filter(oauth2_authorization::Column::ExpiresAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;

        let tokens = oauth2_refresh_token::Entity::delete_many()
            .filter(oauth2_refresh_token::Column::ExpiresAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;

        let families = oauth2_token_family::Entity::delete_many()
            .filter(
                Condition::all()
                    .add(oauth2_token_family::Column::CreatedAt.lt(cutoff - FAMILY_PURGE_GRACE))
                    .add(
                        oauth2_token_family::Column::Id.not_in_subquery(
                            Query::select()
                                .column(oauth2_refresh_token::Column::FamilyId)
                                .from(oauth2_refresh_token::Entity)
                                .to_owned(),
                        ),
                    )
                    .add(
                        oauth2_token_family::Column::Id.not_in_subquery(
                            Query::select()
                                .column(oauth2_authorization::Column::FamilyId)
                                .from(oauth2_authorization::Entity)
                                .to_owned(),
                        ),
                    ),
            )
            .exec(self.db.as_ref())
            .await?;

        Ok(PurgeStats {
            codes: codes.rows_affected,
            refresh_tokens: tokens.rows_affected,
            families: families.rows_affected,
        })
    }

    /// Number of unrevoked tokens in a family.
    pub async fn active_token_count(&self, family_id: &str) -> Result<u64, GrantStoreError> {
        Ok(oauth2_refresh_token::Entity::find()
            .filter(oauth2_refresh_token::Column::FamilyId.eq(family_id))
            .filter(oauth2_refresh_token::Column::RevokedAt.is_null())
            .count(self.db.as_ref())
            .await?)
    }
}
