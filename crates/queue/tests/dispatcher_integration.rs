//! Dispatcher integration tests.
//!
//! These tests require running `PostgreSQL` and Redis instances.
//! Run with: `cargo test --test dispatcher_integration -- --ignored`
//!
//! Environment variables: the `TEST_DB_*` set used by the database tests,
//! plus `TEST_REDIS_URL` (default: `redis://localhost:6379`).

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fanwave_common::IdGenerator;
use fanwave_common::config::DeliveryConfig;
use fanwave_core::services::campaign::CampaignService;
use fanwave_core::services::mailer::{MailError, MailTransport, OutgoingEmail, SendReceipt};
use fanwave_core::services::recorder::DeliveryRecorder;
use fanwave_db::entities::campaign::CampaignStatus;
use fanwave_db::entities::email_sent::DeliveryStatus;
use fanwave_db::entities::fan::SubscriptionStatus;
use fanwave_db::entities::{campaign, fan};
use fanwave_db::repositories::{CampaignRepository, EmailSentRepository, FanRepository};
use fanwave_db::test_utils::TestDatabase;
use fanwave_queue::{
    BatchConfig, BatchOrchestrator, Dispatcher, JobState, JobStore, RetryConfig, SendBatchJob,
    SendRateLimiter, connect_redis,
};
use sea_orm::Set;
use tokio::sync::Mutex;

/// What the scripted transport should do with the next send.
enum Outcome {
    Deliver,
    Transient,
    Permanent,
}

/// Transport that follows a script, then delivers everything else.
struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    delivered: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            delivered: Mutex::new(Vec::new()),
        })
    }

    async fn delivered_to(&self) -> Vec<String> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl MailTransport for ScriptedTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError> {
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Outcome::Deliver);
        match outcome {
            Outcome::Deliver => {
                self.delivered.lock().await.push(email.to.clone());
                Ok(SendReceipt {
                    message_id: email.message_id.clone(),
                })
            }
            Outcome::Transient => Err(MailError::Transient("connection reset".to_string())),
            Outcome::Permanent => Err(MailError::Permanent("mailbox does not exist".to_string())),
        }
    }
}

struct Harness {
    db: TestDatabase,
    store: JobStore,
    dispatcher: Dispatcher,
    orchestrator: BatchOrchestrator,
    campaigns: CampaignRepository,
    fans: FanRepository,
    emails: EmailSentRepository,
    transport: Arc<ScriptedTransport>,
}

async fn harness(script: Vec<Outcome>, retry: RetryConfig) -> Harness {
    let delivery = DeliveryConfig {
        sends_per_second: 1000,
        sends_per_day: 100_000,
        ..Default::default()
    };
    harness_with_delivery(script, retry, delivery).await
}

async fn harness_with_delivery(
    script: Vec<Outcome>,
    retry: RetryConfig,
    delivery: DeliveryConfig,
) -> Harness {
    let db = TestDatabase::create_unique().await.unwrap();
    let conn = Arc::new(db.connection().clone());

    let redis_url =
        std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let redis = connect_redis(&redis_url).await.unwrap();
    let prefix = format!("fanwave_test_{}", IdGenerator::new().generate());

    let campaigns = CampaignRepository::new(Arc::clone(&conn));
    let fans = FanRepository::new(Arc::clone(&conn));
    let emails = EmailSentRepository::new(Arc::clone(&conn));
    let service = CampaignService::new(campaigns.clone(), fans.clone(), emails.clone());
    let recorder = DeliveryRecorder::new(campaigns.clone(), emails.clone());

    let store = JobStore::new(Arc::clone(&redis), &prefix);
    let limiter = SendRateLimiter::new(redis, &prefix, &delivery);
    let transport = ScriptedTransport::new(script);

    let dispatcher = Dispatcher::new(
        store.clone(),
        limiter,
        transport.clone(),
        recorder,
        campaigns.clone(),
        fans.clone(),
        emails.clone(),
        retry,
        Duration::from_secs(600),
        "http://localhost:3000",
    );
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        campaigns.clone(),
        fans.clone(),
        service,
        BatchConfig {
            batch_size: 50,
            stagger: Duration::from_secs(0),
        },
    );

    Harness {
        db,
        store,
        dispatcher,
        orchestrator,
        campaigns,
        fans,
        emails,
        transport,
    }
}

async fn seed_campaign(
    repo: &CampaignRepository,
    artist_id: &str,
    status: CampaignStatus,
) -> campaign::Model {
    let ids = IdGenerator::new();
    repo.create(campaign::ActiveModel {
        id: Set(ids.generate()),
        artist_id: Set(artist_id.to_string()),
        subject: Set("New single out now".to_string()),
        body_html: Set("<p>Listen</p>".to_string()),
        body_text: Set(Some("Listen".to_string())),
        status: Set(status),
        job_id: Set(None),
        stat_sent: Set(0),
        stat_opens: Set(0),
        stat_unique_opens: Set(0),
        stat_clicks: Set(0),
        stat_unique_clicks: Set(0),
        stat_bounces: Set(0),
        stat_complaints: Set(0),
        stat_failed: Set(0),
        scheduled_at: Set(None),
        sent_at: Set(None),
        created_at: Set(chrono::Utc::now().into()),
        updated_at: Set(chrono::Utc::now().into()),
    })
    .await
    .unwrap()
}

async fn seed_fan(repo: &FanRepository, artist_id: &str, email: &str) -> fan::Model {
    let ids = IdGenerator::new();
    repo.create(fan::ActiveModel {
        id: Set(ids.generate()),
        artist_id: Set(artist_id.to_string()),
        email: Set(email.to_string()),
        name: Set(None),
        status: Set(SubscriptionStatus::Subscribed),
        unsubscribed_at: Set(None),
        created_at: Set(chrono::Utc::now().into()),
    })
    .await
    .unwrap()
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_full_delivery_marks_campaign_sent() {
    let h = harness(vec![], RetryConfig::default()).await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    for i in 0..3 {
        seed_fan(&h.fans, "artist1", &format!("fan{i}@example.com")).await;
    }

    let job = h.orchestrator.queue_campaign(&campaign.id).await.unwrap();
    let summary = h.dispatcher.process_next(10).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(h.transport.delivered_to().await.len(), 3);

    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Sent);
    assert!(finished.sent_at.is_some());
    assert_eq!(finished.stat_sent, 3);

    let done = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(done.state, JobState::Completed);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_permanent_failure_skips_recipient_and_continues() {
    // Second send is permanently refused.
    let h = harness(
        vec![Outcome::Deliver, Outcome::Permanent, Outcome::Deliver],
        RetryConfig::default(),
    )
    .await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    for i in 0..3 {
        seed_fan(&h.fans, "artist1", &format!("fan{i}@example.com")).await;
    }

    h.orchestrator.queue_campaign(&campaign.id).await.unwrap();
    let summary = h.dispatcher.process_next(10).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Sent);
    assert_eq!(finished.stat_sent, 2);
    assert_eq!(finished.stat_failed, 1);

    let failed = h
        .emails
        .list_by_campaign(&campaign.id, 100)
        .await
        .unwrap()
        .into_iter()
        .filter(|row| row.status == DeliveryStatus::Failed)
        .count();
    assert_eq!(failed, 1);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_transient_failure_backs_off_then_succeeds() {
    let h = harness(
        vec![Outcome::Transient],
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            ..Default::default()
        },
    )
    .await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    seed_fan(&h.fans, "artist1", "fan0@example.com").await;
    seed_fan(&h.fans, "artist1", "fan1@example.com").await;

    let job = h.orchestrator.queue_campaign(&campaign.id).await.unwrap();

    let summary = h.dispatcher.process_next(10).await.unwrap();
    assert_eq!(summary.rescheduled, 1);
    let delayed = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(delayed.state, JobState::Delayed);
    assert_eq!(delayed.attempts, 1);

    // Campaign stays in sending while the retry is pending.
    let mid = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(mid.status, CampaignStatus::Sending);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let summary = h.dispatcher.process_next(10).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Sent);
    assert_eq!(finished.stat_sent, 2);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_exhausted_retries_fail_job_but_spare_untried_recipients() {
    // Every attempt at the first recipient fails transiently.
    let h = harness(
        vec![Outcome::Transient, Outcome::Transient, Outcome::Transient],
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            ..Default::default()
        },
    )
    .await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    seed_fan(&h.fans, "artist1", "fan0@example.com").await;
    seed_fan(&h.fans, "artist1", "fan1@example.com").await;

    let job = h.orchestrator.queue_campaign(&campaign.id).await.unwrap();

    for _ in 0..3 {
        h.dispatcher.process_next(10).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    // The fresh job for the untried remainder delivers.
    let summary = h.dispatcher.process_next(10).await.unwrap();
    assert_eq!(summary.succeeded, 1);

    let failed = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);

    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Sent);
    assert_eq!(finished.stat_sent, 1);
    assert_eq!(finished.stat_failed, 1);
    assert_eq!(h.transport.delivered_to().await, vec!["fan1@example.com"]);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_rate_limit_defers_remainder_without_blocking() {
    // Daily ceiling of 2: deterministic, unlike the per-second window.
    let h = harness_with_delivery(
        vec![],
        RetryConfig::default(),
        DeliveryConfig {
            sends_per_second: 1000,
            sends_per_day: 2,
            ..Default::default()
        },
    )
    .await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    let mut fan_ids = Vec::new();
    for i in 0..5 {
        fan_ids.push(seed_fan(&h.fans, "artist1", &format!("fan{i}@example.com")).await.id);
    }

    let job = h.orchestrator.queue_campaign(&campaign.id).await.unwrap();
    let summary = h.dispatcher.process_next(10).await.unwrap();

    // Two sends fit under the ceiling; the rest is parked, never slept on.
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.rescheduled, 1);
    assert_eq!(h.transport.delivered_to().await.len(), 2);

    let original = h.store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(original.state, JobState::Completed);

    // The untried remainder sits in a fresh delayed job, in order.
    let delayed = h.store.list(JobState::Delayed, 10).await.unwrap();
    assert_eq!(delayed.len(), 1);
    let parked = SendBatchJob::from_job(&delayed[0]).unwrap();
    assert_eq!(parked.fan_ids, fan_ids[2..].to_vec());

    // No attempt burned waiting on the allowance, campaign still open.
    assert_eq!(delayed[0].attempts, 0);
    let mid = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(mid.status, CampaignStatus::Sending);
    assert_eq!(mid.stat_sent, 2);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_campaign_with_no_successful_send_settles_failed() {
    let h = harness(
        vec![Outcome::Permanent, Outcome::Permanent],
        RetryConfig::default(),
    )
    .await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    seed_fan(&h.fans, "artist1", "fan0@example.com").await;
    seed_fan(&h.fans, "artist1", "fan1@example.com").await;

    h.orchestrator.queue_campaign(&campaign.id).await.unwrap();
    h.dispatcher.process_next(10).await.unwrap();

    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Failed);
    assert!(finished.sent_at.is_none());
    assert_eq!(finished.stat_sent, 0);
    assert_eq!(finished.stat_failed, 2);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_unsubscribe_after_enqueue_is_honored() {
    let h = harness(vec![], RetryConfig::default()).await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Draft).await;
    let quitter = seed_fan(&h.fans, "artist1", "quitter@example.com").await;
    seed_fan(&h.fans, "artist1", "stayer@example.com").await;

    h.orchestrator.queue_campaign(&campaign.id).await.unwrap();
    h.fans.unsubscribe(&quitter.id).await.unwrap();

    h.dispatcher.process_next(10).await.unwrap();

    assert_eq!(h.transport.delivered_to().await, vec!["stayer@example.com"]);
    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.stat_sent, 1);

    h.db.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires running PostgreSQL and Redis instances"]
async fn test_reprocessing_does_not_double_send() {
    let h = harness(vec![], RetryConfig::default()).await;
    let campaign = seed_campaign(&h.campaigns, "artist1", CampaignStatus::Sending).await;
    let f0 = seed_fan(&h.fans, "artist1", "fan0@example.com").await;
    let f1 = seed_fan(&h.fans, "artist1", "fan1@example.com").await;

    // f0 already has a delivery row, as after a crash between the send and
    // the job bookkeeping.
    let ids = IdGenerator::new();
    h.emails
        .insert_sent(&ids.generate(), &campaign.id, &f0.id, &ids.generate_message_id())
        .await
        .unwrap();

    let payload = SendBatchJob {
        campaign_id: campaign.id.clone(),
        fan_ids: vec![f0.id.clone(), f1.id.clone()],
        batch_index: 0,
        batch_count: 1,
    }
    .to_payload()
    .unwrap();
    h.store.add(SendBatchJob::NAME, &payload, None).await.unwrap();

    h.dispatcher.process_next(10).await.unwrap();

    // Only the recipient without a row gets mail.
    assert_eq!(h.transport.delivered_to().await, vec!["fan1@example.com"]);
    let finished = h.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(finished.status, CampaignStatus::Sent);
    assert_eq!(finished.stat_sent, 1);

    h.db.drop_database().await.unwrap();
}
