//! Campaign lifecycle service.

use std::collections::HashSet;

use fanwave_common::{AppError, AppResult};
use fanwave_db::entities::campaign;
use fanwave_db::entities::campaign::CampaignStatus;
use fanwave_db::repositories::{CampaignRepository, EmailSentRepository, FanRepository};

/// Campaign lifecycle validation and recovery helpers.
///
/// Status mutation goes through the repository's compare-and-swap
/// transition; this service adds the send-eligibility checks the API and
/// orchestrator share.
#[derive(Clone)]
pub struct CampaignService {
    campaigns: CampaignRepository,
    fans: FanRepository,
    emails: EmailSentRepository,
}

impl CampaignService {
    /// Create a new campaign service.
    #[must_use]
    pub const fn new(
        campaigns: CampaignRepository,
        fans: FanRepository,
        emails: EmailSentRepository,
    ) -> Self {
        Self {
            campaigns,
            fans,
            emails,
        }
    }

    /// Load a campaign and verify it may enter delivery.
    ///
    /// A `sent` campaign is immutable; a `sending` campaign already has an
    /// active job (at most one is allowed).
    pub async fn get_sendable(&self, campaign_id: &str) -> AppResult<campaign::Model> {
        let campaign = self.campaigns.get(campaign_id).await?;

        match campaign.status {
            CampaignStatus::Draft | CampaignStatus::Scheduled => Ok(campaign),
            CampaignStatus::Sending => Err(AppError::Conflict(format!(
                "Campaign {campaign_id} is already sending"
            ))),
            CampaignStatus::Sent => Err(AppError::Conflict(format!(
                "Campaign {campaign_id} has already been sent"
            ))),
            CampaignStatus::Failed => Err(AppError::Conflict(format!(
                "Campaign {campaign_id} previously failed; clone it to resend"
            ))),
        }
    }

    /// Subscribed fans of this campaign's artist that have no delivery row
    /// yet.
    ///
    /// This is the recovery recipient set: re-enqueuing only fans without an
    /// `email_sent` row bounds the double-send window to sends that raced
    /// the lookup.
    pub async fn unsent_recipient_ids(&self, campaign: &campaign::Model) -> AppResult<Vec<String>> {
        let subscribed = self
            .fans
            .subscribed_ids_by_artist(&campaign.artist_id)
            .await?;
        let already_sent: HashSet<String> = self
            .emails
            .fan_ids_with_rows(&campaign.id)
            .await?
            .into_iter()
            .collect();

        Ok(subscribed
            .into_iter()
            .filter(|id| !already_sent.contains(id))
            .collect())
    }
}
