//! Batch dispatcher: claims jobs, sends email under the shared rate
//! limiter and records the outcome per recipient.
//!
//! Everything here is written to tolerate re-processing: a batch job that
//! dies mid-way leaves delivery rows for the recipients it reached, and the
//! recipient loop never re-sends to a fan that already has one.

use std::sync::Arc;
use std::time::Duration;

use fanwave_common::{AppResult, IdGenerator};
use fanwave_core::services::mailer::{MailTransport, OutgoingEmail};
use fanwave_core::services::recorder::DeliveryRecorder;
use fanwave_db::entities::campaign::CampaignStatus;
use fanwave_db::entities::{campaign, fan};
use fanwave_db::repositories::{CampaignRepository, EmailSentRepository, FanRepository};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::jobs::SendBatchJob;
use crate::rate_limit::SendRateLimiter;
use crate::retry::RetryConfig;
use crate::store::{Job, JobStore};

/// Outcome of one dispatcher invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    /// Jobs claimed and handled.
    pub processed: usize,
    /// Jobs that completed.
    pub succeeded: usize,
    /// Jobs that ended failed.
    pub failed: usize,
    /// Jobs pushed back for a later attempt.
    pub rescheduled: usize,
}

/// How one batch job ended.
enum BatchOutcome {
    Completed,
    Rescheduled,
    Failed,
}

/// Claims and processes batch jobs.
#[derive(Clone)]
pub struct Dispatcher {
    store: JobStore,
    limiter: SendRateLimiter,
    transport: Arc<dyn MailTransport>,
    recorder: DeliveryRecorder,
    campaigns: CampaignRepository,
    fans: FanRepository,
    emails: EmailSentRepository,
    retry: RetryConfig,
    claim_timeout: Duration,
    public_url: String,
    ids: IdGenerator,
}

impl Dispatcher {
    /// Create a new dispatcher.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: JobStore,
        limiter: SendRateLimiter,
        transport: Arc<dyn MailTransport>,
        recorder: DeliveryRecorder,
        campaigns: CampaignRepository,
        fans: FanRepository,
        emails: EmailSentRepository,
        retry: RetryConfig,
        claim_timeout: Duration,
        public_url: &str,
    ) -> Self {
        Self {
            store,
            limiter,
            transport,
            recorder,
            campaigns,
            fans,
            emails,
            retry,
            claim_timeout,
            public_url: public_url.trim_end_matches('/').to_string(),
            ids: IdGenerator::new(),
        }
    }

    /// Promote due jobs, hand back stalled claims, then claim and process up
    /// to `max_jobs`.
    pub async fn process_next(&self, max_jobs: usize) -> AppResult<DispatchSummary> {
        self.store.promote_due().await?;
        self.store.reclaim_stalled(self.claim_timeout).await?;

        let mut summary = DispatchSummary::default();
        for _ in 0..max_jobs {
            let Some(job) = self.store.claim().await? else {
                break;
            };
            summary.processed += 1;

            let outcome = if job.name == SendBatchJob::NAME {
                self.process_batch(&job).await?
            } else {
                warn!(job_id = %job.id, name = %job.name, "Unknown job name");
                self.store
                    .fail(&job.id, &format!("Unknown job name: {}", job.name))
                    .await?;
                BatchOutcome::Failed
            };

            match outcome {
                BatchOutcome::Completed => summary.succeeded += 1,
                BatchOutcome::Rescheduled => summary.rescheduled += 1,
                BatchOutcome::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    async fn process_batch(&self, job: &Job) -> AppResult<BatchOutcome> {
        let batch = match SendBatchJob::from_job(job) {
            Ok(batch) => batch,
            Err(e) => {
                self.store.fail(&job.id, &e.to_string()).await?;
                return Ok(BatchOutcome::Failed);
            }
        };

        let Some(campaign) = self.campaigns.find_by_id(&batch.campaign_id).await? else {
            self.store
                .fail(&job.id, &format!("Campaign {} no longer exists", batch.campaign_id))
                .await?;
            return Ok(BatchOutcome::Failed);
        };

        // Only sending campaigns get mail. Anything else means the campaign
        // moved on while this batch sat in the queue (operator abort,
        // concurrent completion); the batch is then a no-op.
        if campaign.status != CampaignStatus::Sending {
            warn!(
                job_id = %job.id,
                campaign_id = %campaign.id,
                status = campaign.status.as_str(),
                "Campaign left sending state, dropping batch"
            );
            self.store.complete(&job.id).await?;
            return Ok(BatchOutcome::Completed);
        }

        for (position, fan_id) in batch.fan_ids.iter().enumerate() {
            // Skip work a previous attempt already did.
            if self.emails.exists_for(&campaign.id, fan_id).await? {
                debug!(fan_id = %fan_id, "Delivery row exists, skipping");
                continue;
            }

            let Some(recipient) = self.fans.find_by_id(fan_id).await? else {
                debug!(fan_id = %fan_id, "Fan deleted since enqueue, skipping");
                continue;
            };
            // Send-time re-check: unsubscribes between enqueue and now win.
            if !recipient.is_subscribed() {
                debug!(fan_id = %fan_id, "Fan unsubscribed since enqueue, skipping");
                continue;
            }

            let reservation = self.limiter.reserve(1).await?;
            if !reservation.is_full(1) {
                return self
                    .defer_for_rate_limit(job, &batch, position, reservation.retry_after)
                    .await;
            }

            let message_id = self.ids.generate_message_id();
            let email = build_email(&campaign, &recipient, &message_id, &self.public_url);

            match self.transport.send(&email).await {
                Ok(_) => {
                    self.recorder
                        .record_send(&campaign.id, fan_id, &message_id)
                        .await?;
                }
                Err(e) if e.is_transient() => {
                    return self
                        .handle_transient_failure(job, &batch, position, &message_id, &e.to_string())
                        .await;
                }
                Err(e) => {
                    // Permanent: this recipient will never succeed. Record
                    // and move on.
                    warn!(fan_id = %fan_id, error = %e, "Permanent send failure");
                    self.recorder
                        .record_failure(&campaign.id, fan_id, &message_id, &e.to_string())
                        .await?;
                }
            }
        }

        self.store.complete(&job.id).await?;
        self.finish_campaign_if_done(&batch.campaign_id, &job.id).await?;
        Ok(BatchOutcome::Completed)
    }

    /// The shared allowance is exhausted: park the untried remainder as a
    /// fresh delayed job and retire the current one without burning an
    /// attempt on it.
    async fn defer_for_rate_limit(
        &self,
        job: &Job,
        batch: &SendBatchJob,
        position: usize,
        retry_after: Option<Duration>,
    ) -> AppResult<BatchOutcome> {
        let remainder = SendBatchJob {
            campaign_id: batch.campaign_id.clone(),
            fan_ids: batch.fan_ids[position..].to_vec(),
            batch_index: batch.batch_index,
            batch_count: batch.batch_count,
        };

        info!(
            job_id = %job.id,
            campaign_id = %batch.campaign_id,
            remaining = remainder.fan_ids.len(),
            "Rate limited, deferring remainder of batch"
        );

        // The fresh job must exist before the current one completes so the
        // campaign never looks finished in between.
        self.store
            .add(SendBatchJob::NAME, &remainder.to_payload()?, retry_after)
            .await?;
        self.store.complete(&job.id).await?;
        Ok(BatchOutcome::Rescheduled)
    }

    /// A transient transport failure: back off and retry the remainder
    /// (failing recipient included) while the attempt budget lasts.
    async fn handle_transient_failure(
        &self,
        job: &Job,
        batch: &SendBatchJob,
        position: usize,
        message_id: &str,
        error: &str,
    ) -> AppResult<BatchOutcome> {
        let fan_id = &batch.fan_ids[position];

        if self.retry.should_retry(job.attempts) {
            let remainder = SendBatchJob {
                campaign_id: batch.campaign_id.clone(),
                fan_ids: batch.fan_ids[position..].to_vec(),
                batch_index: batch.batch_index,
                batch_count: batch.batch_count,
            };
            let delay = self.retry.delay_for_attempt(job.attempts);

            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_secs = delay.as_secs(),
                error = %error,
                "Transient send failure, backing off"
            );
            self.store
                .reschedule(&job.id, &remainder.to_payload()?, delay)
                .await?;
            return Ok(BatchOutcome::Rescheduled);
        }

        // Budget exhausted: the failing recipient is recorded failed; the
        // untried rest must not die with this job.
        warn!(
            job_id = %job.id,
            fan_id = %fan_id,
            attempts = job.attempts,
            error = %error,
            "Retries exhausted, failing job"
        );
        self.recorder
            .record_failure(
                &batch.campaign_id,
                fan_id,
                message_id,
                &format!("Retries exhausted: {error}"),
            )
            .await?;

        let untried = &batch.fan_ids[position + 1..];
        if !untried.is_empty() {
            let remainder = SendBatchJob {
                campaign_id: batch.campaign_id.clone(),
                fan_ids: untried.to_vec(),
                batch_index: batch.batch_index,
                batch_count: batch.batch_count,
            };
            self.store
                .add(SendBatchJob::NAME, &remainder.to_payload()?, None)
                .await?;
        }

        self.store.fail(&job.id, error).await?;
        self.finish_campaign_if_done(&batch.campaign_id, &job.id).await?;
        Ok(BatchOutcome::Failed)
    }

    /// Close the campaign once no live job still carries work for it.
    ///
    /// A campaign that never produced a single successful send settles as
    /// `failed`, not `sent`.
    async fn finish_campaign_if_done(&self, campaign_id: &str, finished_job: &str) -> AppResult<()> {
        if self
            .store
            .has_pending_for_campaign(campaign_id, Some(finished_job))
            .await?
        {
            return Ok(());
        }

        let Some(campaign) = self.campaigns.find_by_id(campaign_id).await? else {
            return Ok(());
        };
        if campaign.stat_sent == 0 && campaign.stat_failed > 0 {
            if self.campaigns.mark_failed(campaign_id).await? {
                warn!(
                    campaign_id = %campaign_id,
                    failed = campaign.stat_failed,
                    "Campaign exhausted with no successful delivery"
                );
            }
        } else if self.campaigns.mark_sent(campaign_id).await? {
            info!(campaign_id = %campaign_id, "Campaign fully delivered");
        }
        Ok(())
    }
}

/// Render one campaign email for one fan, with the open-tracking pixel
/// appended to the HTML body.
fn build_email(
    campaign: &campaign::Model,
    recipient: &fan::Model,
    message_id: &str,
    public_url: &str,
) -> OutgoingEmail {
    let pixel = format!(
        "<img src=\"{public_url}/t/open/{message_id}\" width=\"1\" height=\"1\" alt=\"\">"
    );
    OutgoingEmail {
        to: recipient.email.clone(),
        to_name: recipient.name.clone(),
        subject: campaign.subject.clone(),
        html_body: format!("{}{pixel}", campaign.body_html),
        text_body: campaign.body_text.clone(),
        message_id: message_id.to_string(),
    }
}
