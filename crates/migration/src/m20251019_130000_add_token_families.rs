//! Refresh-token rotation tables.
//!
//! A token family groups every refresh token descended from one code
//! redemption. The family row is updated by each rotation, which makes it the
//! lock that serialises concurrent rotations and family revocation.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OAuth2TokenFamily::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2TokenFamily::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2TokenFamily::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2TokenFamily::UserId).string().not_null())
                    .col(
                        ColumnDef::new(OAuth2TokenFamily::Generation)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(OAuth2TokenFamily::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2TokenFamily::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(OAuth2RefreshToken::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::FamilyId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ClientId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::UserId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OAuth2RefreshToken::Scope).text().not_null())
                    .col(ColumnDef::new(OAuth2RefreshToken::Claims).text().not_null())
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::RevokedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(OAuth2RefreshToken::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_oauth2_refresh_token_family")
                            .from(OAuth2RefreshToken::Table, OAuth2RefreshToken::FamilyId)
                            .to(OAuth2TokenFamily::Table, OAuth2TokenFamily::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_family_id")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::FamilyId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_oauth2_refresh_token_expires_at")
                    .table(OAuth2RefreshToken::Table)
                    .col(OAuth2RefreshToken::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_refresh_token_expires_at")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_oauth2_refresh_token_family_id")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2RefreshToken::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OAuth2TokenFamily::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum OAuth2TokenFamily {
    #[sea_orm(iden = "oauth2_token_family")]
    Table,
    Id,
    ClientId,
    UserId,
    Generation,
    CreatedAt,
    RevokedAt,
}

#[derive(DeriveIden)]
enum OAuth2RefreshToken {
    #[sea_orm(iden = "oauth2_refresh_token")]
    Table,
    Id,
    FamilyId,
    ClientId,
    UserId,
    Scope,
    Claims,
    ExpiresAt,
    RevokedAt,
    CreatedAt,
}
