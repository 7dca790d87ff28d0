//! `EmailSent` entity: one row per (campaign, fan) delivery attempt.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-recipient delivery state.
///
/// Advances monotonically; webhook events never move a row backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Accepted by the mail transport.
    #[sea_orm(string_value = "sent")]
    Sent,
    /// Opened at least once.
    #[sea_orm(string_value = "opened")]
    Opened,
    /// Clicked at least once.
    #[sea_orm(string_value = "clicked")]
    Clicked,
    /// Hard bounce reported by the provider.
    #[sea_orm(string_value = "bounced")]
    Bounced,
    /// Spam complaint reported by the provider.
    #[sea_orm(string_value = "complained")]
    Complained,
    /// Send failed terminally before the provider accepted it.
    #[sea_orm(string_value = "failed")]
    Failed,
}

/// Delivery-state row for one (campaign, recipient) pair.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "email_sent")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(indexed)]
    pub campaign_id: String,

    #[sea_orm(indexed)]
    pub fan_id: String,

    /// Provider message identifier, used for idempotent webhook correlation.
    #[sea_orm(unique)]
    pub message_id: String,

    /// Current delivery state.
    pub status: DeliveryStatus,

    pub sent_at: DateTimeWithTimeZone,

    /// First open time. Set at most once; later opens only bump raw counters.
    #[sea_orm(nullable)]
    pub opened_at: Option<DateTimeWithTimeZone>,

    /// First click time. Set at most once.
    #[sea_orm(nullable)]
    pub clicked_at: Option<DateTimeWithTimeZone>,

    /// Reason for a terminal failure, if any.
    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::campaign::Entity",
        from = "Column::CampaignId",
        to = "super::campaign::Column::Id",
        on_delete = "Cascade"
    )]
    Campaign,

    #[sea_orm(
        belongs_to = "super::fan::Entity",
        from = "Column::FanId",
        to = "super::fan::Column::Id",
        on_delete = "Cascade"
    )]
    Fan,
}

impl Related<super::campaign::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Campaign.def()
    }
}

impl Related<super::fan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Fan.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
