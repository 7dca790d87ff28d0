//! Campaign repository.

use std::sync::Arc;

use crate::entities::{Campaign, campaign, campaign::CampaignStatus};
use fanwave_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

/// Denormalized stats counter selector.
///
/// Counters are only ever mutated through [`CampaignRepository::increment_stat`],
/// which issues a store-level atomic increment. Fetch-modify-save would lose
/// updates under concurrent webhook delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatCounter {
    /// Successful sends.
    Sent,
    /// Raw open events (duplicates included).
    Opens,
    /// First open per recipient.
    UniqueOpens,
    /// Raw click events (duplicates included).
    Clicks,
    /// First click per recipient.
    UniqueClicks,
    /// Hard bounces.
    Bounces,
    /// Spam complaints.
    Complaints,
    /// Terminal send failures.
    Failed,
}

impl StatCounter {
    const fn column(self) -> campaign::Column {
        match self {
            Self::Sent => campaign::Column::StatSent,
            Self::Opens => campaign::Column::StatOpens,
            Self::UniqueOpens => campaign::Column::StatUniqueOpens,
            Self::Clicks => campaign::Column::StatClicks,
            Self::UniqueClicks => campaign::Column::StatUniqueClicks,
            Self::Bounces => campaign::Column::StatBounces,
            Self::Complaints => campaign::Column::StatComplaints,
            Self::Failed => campaign::Column::StatFailed,
        }
    }
}

/// Campaign repository for database operations.
#[derive(Clone)]
pub struct CampaignRepository {
    db: Arc<DatabaseConnection>,
}

impl CampaignRepository {
    /// Create a new campaign repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a campaign by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<campaign::Model>> {
        Campaign::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a campaign by ID, erroring when it does not exist.
    pub async fn get(&self, id: &str) -> AppResult<campaign::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
    }

    /// Create a new campaign.
    pub async fn create(&self, model: campaign::ActiveModel) -> AppResult<campaign::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List campaigns for an artist, newest first.
    pub async fn list_by_artist(
        &self,
        artist_id: &str,
        limit: u64,
    ) -> AppResult<Vec<campaign::Model>> {
        Campaign::find()
            .filter(campaign::Column::ArtistId.eq(artist_id))
            .order_by_desc(campaign::Column::Id)
            .limit(limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Transition a campaign's status with a compare-and-swap on the current
    /// status.
    ///
    /// The transition table on [`CampaignStatus`] is checked first; the update
    /// itself is conditional on `status = from`, so a concurrent transition
    /// loses cleanly instead of overwriting.
    pub async fn transition(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<()> {
        if !from.can_transition(to) {
            return Err(AppError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let result = Campaign::update_many()
            .col_expr(campaign::Column::Status, Expr::value(to.as_str()))
            .col_expr(
                campaign::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(campaign::Column::Id.eq(id))
            .filter(campaign::Column::Status.eq(from.as_str()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected == 0 {
            return Err(AppError::InvalidTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        Ok(())
    }

    /// Record the campaign's active queue job handle.
    pub async fn set_job_id(&self, id: &str, job_id: Option<&str>) -> AppResult<()> {
        let model = campaign::ActiveModel {
            id: Set(id.to_string()),
            job_id: Set(job_id.map(ToString::to_string)),
            ..Default::default()
        };
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Mark a campaign as fully sent, stamping `sent_at`.
    ///
    /// Conditional on the campaign still being in `sending`, so overlapping
    /// dispatcher invocations cannot double-apply the final transition.
    pub async fn mark_sent(&self, id: &str) -> AppResult<bool> {
        let result = Campaign::update_many()
            .col_expr(
                campaign::Column::Status,
                Expr::value(CampaignStatus::Sent.as_str()),
            )
            .col_expr(campaign::Column::SentAt, Expr::current_timestamp().into())
            .col_expr(campaign::Column::JobId, Expr::value(Option::<String>::None))
            .col_expr(
                campaign::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(campaign::Column::Id.eq(id))
            .filter(campaign::Column::Status.eq(CampaignStatus::Sending.as_str()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Mark a campaign as failed after delivery was abandoned.
    ///
    /// Conditional on `sending`, like [`CampaignRepository::mark_sent`]. No
    /// `sent_at` stamp: the campaign never finished delivering.
    pub async fn mark_failed(&self, id: &str) -> AppResult<bool> {
        let result = Campaign::update_many()
            .col_expr(
                campaign::Column::Status,
                Expr::value(CampaignStatus::Failed.as_str()),
            )
            .col_expr(campaign::Column::JobId, Expr::value(Option::<String>::None))
            .col_expr(
                campaign::Column::UpdatedAt,
                Expr::current_timestamp().into(),
            )
            .filter(campaign::Column::Id.eq(id))
            .filter(campaign::Column::Status.eq(CampaignStatus::Sending.as_str()))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected > 0)
    }

    /// Atomically increment one of the denormalized stats counters.
    pub async fn increment_stat(&self, id: &str, stat: StatCounter, by: i64) -> AppResult<()> {
        let column = stat.column();
        Campaign::update_many()
            .col_expr(column, Expr::col(column).add(by))
            .filter(campaign::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
