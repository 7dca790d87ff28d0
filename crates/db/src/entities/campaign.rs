//! Campaign entity (one outbound bulk-email send unit).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a campaign.
///
/// Transitions follow an explicit table (see [`CampaignStatus::can_transition`]);
/// illegal transitions are rejected at the service boundary instead of relying
/// on callers to check status before mutating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Being edited, not yet queued.
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Scheduled for a future send.
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    /// Batches queued; delivery in progress.
    #[sea_orm(string_value = "sending")]
    Sending,
    /// All batches exhausted. Content is immutable from here on.
    #[sea_orm(string_value = "sent")]
    Sent,
    /// Delivery abandoned.
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl CampaignStatus {
    /// Whether a transition from `self` to `to` is legal.
    ///
    /// `draft -> scheduled -> sending -> sent`, with `failed` reachable from
    /// any non-final state. `sent` campaigns accept no further transitions.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Draft, Self::Scheduled)
                | (Self::Draft | Self::Scheduled, Self::Sending)
                | (Self::Sending, Self::Sent)
                | (Self::Draft | Self::Scheduled | Self::Sending, Self::Failed)
        )
    }

    /// Whether the campaign has reached a final state.
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// String form as stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// A campaign belonging to one artist.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaign")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Owning artist (tenant).
    #[sea_orm(indexed)]
    pub artist_id: String,

    /// Subject line.
    pub subject: String,

    /// HTML body.
    #[sea_orm(column_type = "Text")]
    pub body_html: String,

    /// Plain text body.
    #[sea_orm(column_type = "Text", nullable)]
    pub body_text: Option<String>,

    /// Lifecycle status.
    pub status: CampaignStatus,

    /// Active queue job handle, if any. At most one per campaign.
    #[sea_orm(nullable)]
    pub job_id: Option<String>,

    /// Denormalized stats counters, mutated only via atomic increments.
    pub stat_sent: i64,
    pub stat_opens: i64,
    pub stat_unique_opens: i64,
    pub stat_clicks: i64,
    pub stat_unique_clicks: i64,
    pub stat_bounces: i64,
    pub stat_complaints: i64,
    pub stat_failed: i64,

    #[sea_orm(nullable)]
    pub scheduled_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(nullable)]
    pub sent_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(CampaignStatus::Draft.can_transition(CampaignStatus::Scheduled));
        assert!(CampaignStatus::Draft.can_transition(CampaignStatus::Sending));
        assert!(CampaignStatus::Scheduled.can_transition(CampaignStatus::Sending));
        assert!(CampaignStatus::Sending.can_transition(CampaignStatus::Sent));
        assert!(CampaignStatus::Sending.can_transition(CampaignStatus::Failed));
    }

    #[test]
    fn test_sent_is_immutable() {
        for to in [
            CampaignStatus::Draft,
            CampaignStatus::Scheduled,
            CampaignStatus::Sending,
            CampaignStatus::Failed,
        ] {
            assert!(!CampaignStatus::Sent.can_transition(to));
        }
        assert!(CampaignStatus::Sent.is_final());
    }

    #[test]
    fn test_no_skipping_back_from_final() {
        assert!(!CampaignStatus::Failed.can_transition(CampaignStatus::Sending));
        assert!(!CampaignStatus::Sent.can_transition(CampaignStatus::Sent));
    }
}
