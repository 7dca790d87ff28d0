//! Fan entity (a subscriber on an artist's mailing list).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Subscription status of a fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Eligible for campaign delivery.
    #[sea_orm(string_value = "subscribed")]
    Subscribed,
    /// Opted out; must be skipped even if already queued.
    #[sea_orm(string_value = "unsubscribed")]
    Unsubscribed,
}

/// A fan belonging to one artist.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fan")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning artist (tenant).
    #[sea_orm(indexed)]
    pub artist_id: String,

    /// Email address.
    pub email: String,

    /// Display name.
    #[sea_orm(nullable)]
    pub name: Option<String>,

    /// Subscription status.
    pub status: SubscriptionStatus,

    #[sea_orm(nullable)]
    pub unsubscribed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::email_sent::Entity")]
    EmailSent,
}

impl Related<super::email_sent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailSent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether this fan may receive campaign mail right now.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.status == SubscriptionStatus::Subscribed
    }
}
