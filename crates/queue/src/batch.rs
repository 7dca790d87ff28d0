//! Campaign fan-out: splitting a recipient snapshot into staggered batch
//! jobs.

use std::time::Duration;

use chrono::Utc;
use fanwave_common::{AppError, AppResult};
use fanwave_core::services::campaign::CampaignService;
use fanwave_db::entities::campaign::CampaignStatus;
use fanwave_db::repositories::{CampaignRepository, FanRepository};
use tracing::info;

use crate::jobs::SendBatchJob;
use crate::store::{Job, JobStore};

/// Fan-out parameters.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum recipients per batch job.
    pub batch_size: usize,
    /// Delay between consecutive batches.
    pub stagger: Duration,
}

impl BatchConfig {
    /// Build from delivery configuration.
    #[must_use]
    pub fn from_delivery(config: &fanwave_common::config::DeliveryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            stagger: Duration::from_secs(config.stagger_secs),
        }
    }
}

/// Splits campaigns into batch jobs and enqueues them.
#[derive(Clone)]
pub struct BatchOrchestrator {
    store: JobStore,
    campaigns: CampaignRepository,
    fans: FanRepository,
    service: CampaignService,
    config: BatchConfig,
}

impl BatchOrchestrator {
    /// Create a new orchestrator.
    #[must_use]
    pub const fn new(
        store: JobStore,
        campaigns: CampaignRepository,
        fans: FanRepository,
        service: CampaignService,
        config: BatchConfig,
    ) -> Self {
        Self {
            store,
            campaigns,
            fans,
            service,
            config,
        }
    }

    /// Queue a campaign for delivery.
    ///
    /// Snapshots the subscribed audience, transitions the campaign to
    /// `sending` and enqueues one job per batch, each staggered behind the
    /// previous. Returns the first job.
    pub async fn queue_campaign(&self, campaign_id: &str) -> AppResult<Job> {
        let campaign = self.service.get_sendable(campaign_id).await?;

        let fan_ids = self.fans.subscribed_ids_by_artist(&campaign.artist_id).await?;
        if fan_ids.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Campaign {campaign_id} has no subscribed recipients"
            )));
        }

        // Claim the campaign before any job exists; the CAS loses to a
        // concurrent send and nothing gets enqueued twice.
        self.campaigns
            .transition(campaign_id, campaign.status, CampaignStatus::Sending)
            .await?;

        // A scheduled campaign holds its first batch until the scheduled
        // time; the stagger builds on top of that.
        let initial_delay = campaign
            .scheduled_at
            .and_then(|at| (at.with_timezone(&Utc) - Utc::now()).to_std().ok());

        let recipients = fan_ids.len();
        let first = self
            .enqueue_batches(campaign_id, fan_ids, initial_delay)
            .await?;

        info!(
            campaign_id = %campaign_id,
            recipients = recipients,
            job_id = %first.id,
            "Queued campaign for delivery"
        );
        Ok(first)
    }

    /// Re-queue delivery for a `sending` campaign whose jobs were lost.
    ///
    /// Only fans without a delivery row are re-enqueued, and only when no
    /// live job for the campaign remains; a campaign that turns out to have
    /// nothing left is closed as sent instead.
    pub async fn recover_campaign(&self, campaign_id: &str) -> AppResult<Job> {
        let campaign = self.campaigns.get(campaign_id).await?;
        if campaign.status != CampaignStatus::Sending {
            return Err(AppError::Conflict(format!(
                "Campaign {campaign_id} is {}, only sending campaigns can be recovered",
                campaign.status.as_str()
            )));
        }

        if let Some(job_id) = &campaign.job_id {
            if self.store.get_job(job_id).await?.is_some() {
                return Err(AppError::Conflict(format!(
                    "Campaign {campaign_id} still has job {job_id}, refusing recovery"
                )));
            }
        }
        if self.store.has_pending_for_campaign(campaign_id, None).await? {
            return Err(AppError::Conflict(format!(
                "Campaign {campaign_id} still has pending jobs, refusing recovery"
            )));
        }

        let remaining = self.service.unsent_recipient_ids(&campaign).await?;
        if remaining.is_empty() {
            self.campaigns.mark_sent(campaign_id).await?;
            return Err(AppError::Conflict(format!(
                "Campaign {campaign_id} has no unsent recipients, closed as sent"
            )));
        }

        let recipients = remaining.len();
        let first = self.enqueue_batches(campaign_id, remaining, None).await?;

        info!(
            campaign_id = %campaign_id,
            recipients = recipients,
            job_id = %first.id,
            "Recovered orphaned campaign"
        );
        Ok(first)
    }

    async fn enqueue_batches(
        &self,
        campaign_id: &str,
        fan_ids: Vec<String>,
        initial_delay: Option<Duration>,
    ) -> AppResult<Job> {
        let batches = chunk_recipients(&fan_ids, self.config.batch_size);
        let batch_count = batches.len();
        let mut first: Option<Job> = None;

        for (index, batch) in batches.into_iter().enumerate() {
            let payload = SendBatchJob {
                campaign_id: campaign_id.to_string(),
                fan_ids: batch,
                batch_index: index,
                batch_count,
            }
            .to_payload()?;

            let delay = stagger_delay(index, self.config.stagger, initial_delay);
            let job = self.store.add(SendBatchJob::NAME, &payload, delay).await?;
            if first.is_none() {
                self.campaigns.set_job_id(campaign_id, Some(&job.id)).await?;
                first = Some(job);
            }
        }

        first.ok_or_else(|| AppError::Queue("No batches enqueued".to_string()))
    }
}

/// Split a recipient snapshot into order-preserving chunks.
fn chunk_recipients(fan_ids: &[String], batch_size: usize) -> Vec<Vec<String>> {
    fan_ids
        .chunks(batch_size.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

/// Delay for the `index`-th batch: each batch trails the previous by the
/// stagger interval.
fn stagger_delay(
    index: usize,
    stagger: Duration,
    initial_delay: Option<Duration>,
) -> Option<Duration> {
    let offset = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
    match initial_delay {
        Some(base) => Some(base.saturating_add(offset)),
        None if index == 0 => None,
        None => Some(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("fan{i:03}")).collect()
    }

    #[test]
    fn test_chunking_preserves_order_and_partitions() {
        let fans = ids(120);
        let batches = chunk_recipients(&fans, 50);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 50);
        assert_eq!(batches[1].len(), 50);
        assert_eq!(batches[2].len(), 20);

        let rejoined: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(rejoined, fans);
    }

    #[test]
    fn test_chunking_exact_multiple() {
        let batches = chunk_recipients(&ids(100), 50);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 50));
    }

    #[test]
    fn test_chunking_single_small_batch() {
        let batches = chunk_recipients(&ids(7), 50);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 7);
    }

    #[test]
    fn test_stagger_first_batch_is_immediate() {
        let stagger = Duration::from_secs(30);
        assert_eq!(stagger_delay(0, stagger, None), None);
        assert_eq!(stagger_delay(1, stagger, None), Some(Duration::from_secs(30)));
        assert_eq!(stagger_delay(3, stagger, None), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_stagger_with_initial_delay() {
        let stagger = Duration::from_secs(30);
        let base = Some(Duration::from_secs(10));
        assert_eq!(stagger_delay(0, stagger, base), Some(Duration::from_secs(10)));
        assert_eq!(stagger_delay(2, stagger, base), Some(Duration::from_secs(70)));
    }
}
