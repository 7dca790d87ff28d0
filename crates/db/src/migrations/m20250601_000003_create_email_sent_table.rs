//! Create `email_sent` table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EmailSent::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailSent::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(EmailSent::CampaignId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(EmailSent::FanId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(EmailSent::MessageId)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EmailSent::Status)
                            .string_len(16)
                            .not_null()
                            .default("sent"),
                    )
                    .col(
                        ColumnDef::new(EmailSent::SentAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(EmailSent::OpenedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(EmailSent::ClickedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(EmailSent::FailureReason).string_len(1024))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_sent_campaign")
                            .from(EmailSent::Table, EmailSent::CampaignId)
                            .to(Campaign::Table, Campaign::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_sent_fan")
                            .from(EmailSent::Table, EmailSent::FanId)
                            .to(Fan::Table, Fan::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: message_id - webhook correlation token
        manager
            .create_index(
                Index::create()
                    .name("idx_email_sent_message_id")
                    .table(EmailSent::Table)
                    .col(EmailSent::MessageId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Unique index: (campaign_id, fan_id) - one row per recipient per campaign
        manager
            .create_index(
                Index::create()
                    .name("idx_email_sent_campaign_fan")
                    .table(EmailSent::Table)
                    .col(EmailSent::CampaignId)
                    .col(EmailSent::FanId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailSent::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum EmailSent {
    Table,
    Id,
    CampaignId,
    FanId,
    MessageId,
    Status,
    SentAt,
    OpenedAt,
    ClickedAt,
    FailureReason,
}

#[derive(Iden)]
enum Campaign {
    Table,
    Id,
}

#[derive(Iden)]
enum Fan {
    Table,
    Id,
}
