//! Fan repository.

use std::sync::Arc;

use crate::entities::{Fan, fan, fan::SubscriptionStatus};
use fanwave_common::{AppError, AppResult};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

/// Fan repository for database operations.
#[derive(Clone)]
pub struct FanRepository {
    db: Arc<DatabaseConnection>,
}

impl FanRepository {
    /// Create a new fan repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a fan by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<fan::Model>> {
        Fan::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a new fan.
    pub async fn create(&self, model: fan::ActiveModel) -> AppResult<fan::Model> {
        model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Load the IDs of all currently subscribed fans for an artist, in
    /// stable (ID) order.
    ///
    /// This is the enqueue-time eligibility snapshot; the dispatcher
    /// re-checks each fan's status again at send time.
    pub async fn subscribed_ids_by_artist(&self, artist_id: &str) -> AppResult<Vec<String>> {
        Fan::find()
            .filter(fan::Column::ArtistId.eq(artist_id))
            .filter(fan::Column::Status.eq(SubscriptionStatus::Subscribed))
            .order_by_asc(fan::Column::Id)
            .select_only()
            .column(fan::Column::Id)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Count currently subscribed fans for an artist.
    pub async fn count_subscribed(&self, artist_id: &str) -> AppResult<u64> {
        use sea_orm::PaginatorTrait;
        Fan::find()
            .filter(fan::Column::ArtistId.eq(artist_id))
            .filter(fan::Column::Status.eq(SubscriptionStatus::Subscribed))
            .count(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Unsubscribe a fan.
    pub async fn unsubscribe(&self, id: &str) -> AppResult<()> {
        Fan::update_many()
            .col_expr(
                fan::Column::Status,
                Expr::value(SubscriptionStatus::Unsubscribed),
            )
            .col_expr(
                fan::Column::UnsubscribedAt,
                Expr::current_timestamp().into(),
            )
            .filter(fan::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }
}
