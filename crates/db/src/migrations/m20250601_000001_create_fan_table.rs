//! Create fan table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Fan::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Fan::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Fan::ArtistId).string_len(32).not_null())
                    .col(ColumnDef::new(Fan::Email).string_len(320).not_null())
                    .col(ColumnDef::new(Fan::Name).string_len(256))
                    .col(
                        ColumnDef::new(Fan::Status)
                            .string_len(16)
                            .not_null()
                            .default("subscribed"),
                    )
                    .col(ColumnDef::new(Fan::UnsubscribedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Fan::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (artist_id, email) - one list entry per address per artist
        manager
            .create_index(
                Index::create()
                    .name("idx_fan_artist_email")
                    .table(Fan::Table)
                    .col(Fan::ArtistId)
                    .col(Fan::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (artist_id, status) - for loading the subscribed set
        manager
            .create_index(
                Index::create()
                    .name("idx_fan_artist_status")
                    .table(Fan::Table)
                    .col(Fan::ArtistId)
                    .col(Fan::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Fan::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Fan {
    Table,
    Id,
    ArtistId,
    Email,
    Name,
    Status,
    UnsubscribedAt,
    CreatedAt,
}
