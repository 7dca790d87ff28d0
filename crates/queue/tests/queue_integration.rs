//! Queue integration tests.
//!
//! These tests require a running Redis instance.
//! Run with: `cargo test --test queue_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_REDIS_URL` (default: `redis://localhost:6379`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use fanwave_common::IdGenerator;
use fanwave_common::config::DeliveryConfig;
use fanwave_queue::{JobState, JobStore, SendBatchJob, SendRateLimiter, connect_redis};
use fred::clients::Client as RedisClient;
use fred::interfaces::HashesInterface;

async fn test_store() -> (JobStore, String) {
    let url =
        std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let redis = connect_redis(&url).await.unwrap();
    // Unique prefix per test so runs never see each other's keys.
    let prefix = format!("fanwave_test_{}", IdGenerator::new().generate());
    (JobStore::new(redis, &prefix), prefix)
}

async fn test_redis() -> Arc<RedisClient> {
    let url =
        std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    connect_redis(&url).await.unwrap()
}

fn payload(campaign_id: &str, fans: &[&str]) -> serde_json::Value {
    SendBatchJob {
        campaign_id: campaign_id.to_string(),
        fan_ids: fans.iter().map(ToString::to_string).collect(),
        batch_index: 0,
        batch_count: 1,
    }
    .to_payload()
    .unwrap()
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_add_and_claim_moves_job_to_active() {
    let (store, _) = test_store().await;

    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1", "f2"]), None)
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.attempts, 0);

    let claimed = store.claim().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.attempts, 1);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_concurrent_claims_yield_one_winner() {
    let (store, _) = test_store().await;
    store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    let a = {
        let store = store.clone();
        tokio::spawn(async move { store.claim().await.unwrap() })
    };
    let b = {
        let store = store.clone();
        tokio::spawn(async move { store.claim().await.unwrap() })
    };

    let wins = [a.await.unwrap(), b.await.unwrap()]
        .into_iter()
        .flatten()
        .count();
    assert_eq!(wins, 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_delayed_job_not_claimable_until_due() {
    let (store, _) = test_store().await;
    store
        .add(
            SendBatchJob::NAME,
            &payload("c1", &["f1"]),
            Some(Duration::from_millis(200)),
        )
        .await
        .unwrap();

    assert_eq!(store.promote_due().await.unwrap(), 0);
    assert!(store.claim().await.unwrap().is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.promote_due().await.unwrap(), 1);

    let claimed = store.claim().await.unwrap().unwrap();
    assert_eq!(claimed.state, JobState::Active);
    assert!(claimed.delay_until.is_none());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_pause_blocks_claims_until_resume() {
    let (store, _) = test_store().await;
    store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    store.pause().await.unwrap();
    assert!(store.counts().await.unwrap().paused);
    assert!(store.claim().await.unwrap().is_none());

    store.resume().await.unwrap();
    assert!(store.claim().await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_fail_then_retry_resets_attempt_budget() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    store.claim().await.unwrap().unwrap();
    store.fail(&job.id, "smtp timeout").await.unwrap();

    let failed = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.failed_reason.as_deref(), Some("smtp timeout"));

    let retried = store.retry(&job.id).await.unwrap();
    assert_eq!(retried.state, JobState::Waiting);
    assert_eq!(retried.attempts, 0);
    assert!(retried.failed_reason.is_none());

    let claimed = store.claim().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_retry_rejects_live_jobs() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    assert!(store.retry(&job.id).await.is_err());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_reschedule_keeps_attempt_count() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1", "f2"]), None)
        .await
        .unwrap();

    store.claim().await.unwrap().unwrap();
    store
        .reschedule(&job.id, &payload("c1", &["f2"]), Duration::from_millis(50))
        .await
        .unwrap();

    let delayed = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(delayed.state, JobState::Delayed);
    assert_eq!(delayed.attempts, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    store.promote_due().await.unwrap();

    let claimed = store.claim().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);
    let batch = SendBatchJob::from_job(&claimed).unwrap();
    assert_eq!(batch.fan_ids, vec!["f2"]);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_stalled_active_job_is_reclaimed() {
    let (store, prefix) = test_store().await;
    let redis = test_redis().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    store.claim().await.unwrap().unwrap();

    // Backdate the claim, as if its dispatcher died an hour ago.
    let stale = (chrono::Utc::now() - chrono::TimeDelta::hours(1)).to_rfc3339();
    redis
        .hset::<(), _, _>(
            format!("{prefix}:queue:job:{}", job.id),
            ("processed_on", stale),
        )
        .await
        .unwrap();

    let reclaimed = store.reclaim_stalled(Duration::from_secs(600)).await.unwrap();
    assert_eq!(reclaimed, 1);

    let back = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(back.state, JobState::Waiting);
    // The attempt budget keeps counting across the reclaim.
    let claimed = store.claim().await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.active, 1);
    assert_eq!(counts.waiting, 0);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_fresh_active_job_is_not_reclaimed() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    store.claim().await.unwrap().unwrap();
    let reclaimed = store.reclaim_stalled(Duration::from_secs(600)).await.unwrap();
    assert_eq!(reclaimed, 0);

    let still = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(still.state, JobState::Active);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_remove_deletes_from_everything() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();

    store.remove(&job.id).await.unwrap();
    assert!(store.get_job(&job.id).await.unwrap().is_none());
    assert!(store.claim().await.unwrap().is_none());
    assert!(store.remove(&job.id).await.is_err());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_has_pending_for_campaign_scans_live_states() {
    let (store, _) = test_store().await;
    let job = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();
    store
        .add(
            SendBatchJob::NAME,
            &payload("c2", &["f9"]),
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    assert!(store.has_pending_for_campaign("c1", None).await.unwrap());
    // Excluding the only job for c1 leaves nothing pending.
    assert!(
        !store
            .has_pending_for_campaign("c1", Some(&job.id))
            .await
            .unwrap()
    );
    // The delayed job still counts for c2.
    assert!(store.has_pending_for_campaign("c2", None).await.unwrap());
    assert!(!store.has_pending_for_campaign("c3", None).await.unwrap());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_list_returns_jobs_in_enqueue_order() {
    let (store, _) = test_store().await;
    let first = store
        .add(SendBatchJob::NAME, &payload("c1", &["f1"]), None)
        .await
        .unwrap();
    let second = store
        .add(SendBatchJob::NAME, &payload("c1", &["f2"]), None)
        .await
        .unwrap();

    let jobs = store.list(JobState::Waiting, 10).await.unwrap();
    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str()]);

    let limited = store.list(JobState::Waiting, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_rate_limiter_grants_within_ceiling() {
    let redis = test_redis().await;
    let prefix = format!("fanwave_test_{}", IdGenerator::new().generate());
    let config = DeliveryConfig {
        sends_per_second: 5,
        sends_per_day: 100,
        ..Default::default()
    };
    let limiter = SendRateLimiter::new(redis, &prefix, &config);

    let first = limiter.reserve(3).await.unwrap();
    assert_eq!(first.allowed, 3);
    assert!(first.retry_after.is_none());

    let second = limiter.reserve(3).await.unwrap();
    assert_eq!(second.allowed, 2);
    assert!(second.retry_after.is_some());
    // The partial grant hands back the refused portion, so the window
    // must now be exactly full.
    let third = limiter.reserve(1).await.unwrap();
    assert_eq!(third.allowed, 0);
    assert!(third.retry_after.unwrap() <= Duration::from_secs(1));
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_rate_limiter_day_ceiling() {
    let redis = test_redis().await;
    let prefix = format!("fanwave_test_{}", IdGenerator::new().generate());
    let config = DeliveryConfig {
        sends_per_second: 1000,
        sends_per_day: 4,
        ..Default::default()
    };
    let limiter = SendRateLimiter::new(redis, &prefix, &config);

    assert_eq!(limiter.reserve(4).await.unwrap().allowed, 4);

    let denied = limiter.reserve(1).await.unwrap();
    assert_eq!(denied.allowed, 0);
    // Day window: the wait reaches toward the next UTC midnight.
    assert!(denied.retry_after.unwrap() > Duration::from_secs(1));
}
