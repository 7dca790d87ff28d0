//! Delivery recorder: per-recipient delivery-state transitions.
//!
//! Webhook delivery from the mail provider is at-least-once, so every
//! recording operation here must absorb duplicates: raw counters move on
//! every event, unique counters and first-occurrence timestamps move only
//! for the call that won the conditional update.

use fanwave_common::{AppResult, IdGenerator};
use fanwave_db::entities::email_sent::DeliveryStatus;
use fanwave_db::repositories::{CampaignRepository, EmailSentRepository, StatCounter};
use tracing::debug;

/// Records send/open/click/bounce/complaint transitions and keeps the
/// campaign's denormalized stats in step.
#[derive(Clone)]
pub struct DeliveryRecorder {
    campaigns: CampaignRepository,
    emails: EmailSentRepository,
    ids: IdGenerator,
}

impl DeliveryRecorder {
    /// Create a new delivery recorder.
    #[must_use]
    pub const fn new(campaigns: CampaignRepository, emails: EmailSentRepository) -> Self {
        Self {
            campaigns,
            emails,
            ids: IdGenerator::new(),
        }
    }

    /// Record a successful send attempt.
    pub async fn record_send(
        &self,
        campaign_id: &str,
        fan_id: &str,
        message_id: &str,
    ) -> AppResult<()> {
        self.emails
            .insert_sent(&self.ids.generate(), campaign_id, fan_id, message_id)
            .await?;
        self.campaigns
            .increment_stat(campaign_id, StatCounter::Sent, 1)
            .await?;
        Ok(())
    }

    /// Record a terminal send failure (invalid address, suppression).
    pub async fn record_failure(
        &self,
        campaign_id: &str,
        fan_id: &str,
        message_id: &str,
        reason: &str,
    ) -> AppResult<()> {
        self.emails
            .insert_failed(&self.ids.generate(), campaign_id, fan_id, message_id, reason)
            .await?;
        self.campaigns
            .increment_stat(campaign_id, StatCounter::Failed, 1)
            .await?;
        Ok(())
    }

    /// Record an open event.
    ///
    /// Raw `opens` moves on every event; `unique_opens` and `opened_at` only
    /// on the first occurrence.
    pub async fn record_open(&self, message_id: &str) -> AppResult<()> {
        let Some(row) = self.emails.find_by_message_id(message_id).await? else {
            debug!(message_id = %message_id, "Open event for unknown message, ignoring");
            return Ok(());
        };

        let first = self.emails.mark_opened_first(message_id).await?;

        self.campaigns
            .increment_stat(&row.campaign_id, StatCounter::Opens, 1)
            .await?;
        if first {
            self.campaigns
                .increment_stat(&row.campaign_id, StatCounter::UniqueOpens, 1)
                .await?;
        }
        Ok(())
    }

    /// Record a click event. Same first-occurrence contract as opens.
    pub async fn record_click(&self, message_id: &str) -> AppResult<()> {
        let Some(row) = self.emails.find_by_message_id(message_id).await? else {
            debug!(message_id = %message_id, "Click event for unknown message, ignoring");
            return Ok(());
        };

        let first = self.emails.mark_clicked_first(message_id).await?;

        self.campaigns
            .increment_stat(&row.campaign_id, StatCounter::Clicks, 1)
            .await?;
        if first {
            self.campaigns
                .increment_stat(&row.campaign_id, StatCounter::UniqueClicks, 1)
                .await?;
        }
        Ok(())
    }

    /// Record a hard bounce reported by the provider.
    pub async fn record_bounce(&self, message_id: &str, reason: Option<&str>) -> AppResult<()> {
        let Some(row) = self.emails.find_by_message_id(message_id).await? else {
            debug!(message_id = %message_id, "Bounce event for unknown message, ignoring");
            return Ok(());
        };

        let changed = self
            .emails
            .mark_terminal(message_id, DeliveryStatus::Bounced, reason)
            .await?;
        if changed {
            self.campaigns
                .increment_stat(&row.campaign_id, StatCounter::Bounces, 1)
                .await?;
        }
        Ok(())
    }

    /// Record a spam complaint reported by the provider.
    pub async fn record_complaint(&self, message_id: &str) -> AppResult<()> {
        let Some(row) = self.emails.find_by_message_id(message_id).await? else {
            debug!(message_id = %message_id, "Complaint event for unknown message, ignoring");
            return Ok(());
        };

        let changed = self
            .emails
            .mark_terminal(message_id, DeliveryStatus::Complained, None)
            .await?;
        if changed {
            self.campaigns
                .increment_stat(&row.campaign_id, StatCounter::Complaints, 1)
                .await?;
        }
        Ok(())
    }
}
