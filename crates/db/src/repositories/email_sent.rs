//! `EmailSent` repository.

use std::sync::Arc;

use crate::entities::{EmailSent, email_sent, email_sent::DeliveryStatus};
use fanwave_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

/// `EmailSent` repository for database operations.
#[derive(Clone)]
pub struct EmailSentRepository {
    db: Arc<DatabaseConnection>,
}

impl EmailSentRepository {
    /// Create a new `EmailSent` repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Record a successful send for a (campaign, fan) pair.
    pub async fn insert_sent(
        &self,
        id: &str,
        campaign_id: &str,
        fan_id: &str,
        message_id: &str,
    ) -> AppResult<email_sent::Model> {
        let model = email_sent::ActiveModel {
            id: Set(id.to_string()),
            campaign_id: Set(campaign_id.to_string()),
            fan_id: Set(fan_id.to_string()),
            message_id: Set(message_id.to_string()),
            status: Set(DeliveryStatus::Sent),
            sent_at: Set(chrono::Utc::now().into()),
            opened_at: Set(None),
            clicked_at: Set(None),
            failure_reason: Set(None),
        };
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Record a terminal send failure for a (campaign, fan) pair.
    pub async fn insert_failed(
        &self,
        id: &str,
        campaign_id: &str,
        fan_id: &str,
        message_id: &str,
        reason: &str,
    ) -> AppResult<email_sent::Model> {
        let model = email_sent::ActiveModel {
            id: Set(id.to_string()),
            campaign_id: Set(campaign_id.to_string()),
            fan_id: Set(fan_id.to_string()),
            message_id: Set(message_id.to_string()),
            status: Set(DeliveryStatus::Failed),
            sent_at: Set(chrono::Utc::now().into()),
            opened_at: Set(None),
            clicked_at: Set(None),
            failure_reason: Set(Some(reason.to_string())),
        };
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a delivery row by its provider message identifier.
    pub async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> AppResult<Option<email_sent::Model>> {
        EmailSent::find()
            .filter(email_sent::Column::MessageId.eq(message_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List delivery rows for a campaign, oldest first.
    pub async fn list_by_campaign(
        &self,
        campaign_id: &str,
        limit: u64,
    ) -> AppResult<Vec<email_sent::Model>> {
        EmailSent::find()
            .filter(email_sent::Column::CampaignId.eq(campaign_id))
            .order_by_asc(email_sent::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Stamp `opened_at` if it has never been set.
    ///
    /// Returns `true` only for the call that won the first-occurrence race;
    /// the conditional `WHERE opened_at IS NULL` makes duplicate webhook
    /// deliveries harmless. Also advances `status` from `sent` to `opened`
    /// without downgrading a `clicked` row.
    pub async fn mark_opened_first(&self, message_id: &str) -> AppResult<bool> {
        let result = EmailSent::update_many()
            .col_expr(
                email_sent::Column::OpenedAt,
                Expr::current_timestamp().into(),
            )
            .filter(email_sent::Column::MessageId.eq(message_id))
            .filter(email_sent::Column::OpenedAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        EmailSent::update_many()
            .col_expr(
                email_sent::Column::Status,
                Expr::value(DeliveryStatus::Opened),
            )
            .filter(email_sent::Column::MessageId.eq(message_id))
            .filter(email_sent::Column::Status.eq(DeliveryStatus::Sent))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Stamp `clicked_at` if it has never been set.
    ///
    /// Same first-occurrence-wins contract as [`Self::mark_opened_first`].
    pub async fn mark_clicked_first(&self, message_id: &str) -> AppResult<bool> {
        let result = EmailSent::update_many()
            .col_expr(
                email_sent::Column::ClickedAt,
                Expr::current_timestamp().into(),
            )
            .filter(email_sent::Column::MessageId.eq(message_id))
            .filter(email_sent::Column::ClickedAt.is_null())
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        EmailSent::update_many()
            .col_expr(
                email_sent::Column::Status,
                Expr::value(DeliveryStatus::Clicked),
            )
            .filter(email_sent::Column::MessageId.eq(message_id))
            .filter(
                email_sent::Column::Status
                    .is_in([DeliveryStatus::Sent, DeliveryStatus::Opened]),
            )
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Move a row to a terminal provider-reported state (bounce/complaint).
    ///
    /// Returns `true` if the row existed and was not already in that state,
    /// so callers can keep counters idempotent under duplicate webhooks.
    pub async fn mark_terminal(
        &self,
        message_id: &str,
        status: DeliveryStatus,
        reason: Option<&str>,
    ) -> AppResult<bool> {
        let result = EmailSent::update_many()
            .col_expr(email_sent::Column::Status, Expr::value(status))
            .col_expr(
                email_sent::Column::FailureReason,
                Expr::value(reason.map(ToString::to_string)),
            )
            .filter(email_sent::Column::MessageId.eq(message_id))
            .filter(email_sent::Column::Status.ne(status))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// IDs of fans that already have a delivery row for this campaign.
    ///
    /// Used by operator-invoked orphan recovery to re-enqueue only the
    /// recipients that never got a send attempt.
    pub async fn fan_ids_with_rows(&self, campaign_id: &str) -> AppResult<Vec<String>> {
        EmailSent::find()
            .filter(email_sent::Column::CampaignId.eq(campaign_id))
            .select_only()
            .column(email_sent::Column::FanId)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Whether a delivery row already exists for this (campaign, fan) pair.
    pub async fn exists_for(&self, campaign_id: &str, fan_id: &str) -> AppResult<bool> {
        use sea_orm::PaginatorTrait;
        let count = EmailSent::find()
            .filter(email_sent::Column::CampaignId.eq(campaign_id))
            .filter(email_sent::Column::FanId.eq(fan_id))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count > 0)
    }
}
