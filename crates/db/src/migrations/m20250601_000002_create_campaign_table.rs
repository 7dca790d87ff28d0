//! Create campaign table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Campaign::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Campaign::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Campaign::ArtistId).string_len(32).not_null())
                    .col(ColumnDef::new(Campaign::Subject).string_len(998).not_null())
                    .col(ColumnDef::new(Campaign::BodyHtml).text().not_null())
                    .col(ColumnDef::new(Campaign::BodyText).text())
                    .col(
                        ColumnDef::new(Campaign::Status)
                            .string_len(16)
                            .not_null()
                            .default("draft"),
                    )
                    .col(ColumnDef::new(Campaign::JobId).string_len(32))
                    .col(
                        ColumnDef::new(Campaign::StatSent)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatOpens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatUniqueOpens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatClicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatUniqueClicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatBounces)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatComplaints)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Campaign::StatFailed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Campaign::ScheduledAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Campaign::SentAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Campaign::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Campaign::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (artist_id, status) - for dashboard listings
        manager
            .create_index(
                Index::create()
                    .name("idx_campaign_artist_status")
                    .table(Campaign::Table)
                    .col(Campaign::ArtistId)
                    .col(Campaign::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Campaign::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Campaign {
    Table,
    Id,
    ArtistId,
    Subject,
    BodyHtml,
    BodyText,
    Status,
    JobId,
    StatSent,
    StatOpens,
    StatUniqueOpens,
    StatClicks,
    StatUniqueClicks,
    StatBounces,
    StatComplaints,
    StatFailed,
    ScheduledAt,
    SentAt,
    CreatedAt,
    UpdatedAt,
}
