//! Durable Redis job store.
//!
//! Jobs live in a hash per job plus one structure per state: lists for
//! `waiting`/`active`/`completed`/`failed` and a sorted set (scored by due
//! time in epoch milliseconds) for `delayed`. Claiming is a single `LMOVE`
//! from `waiting` to `active`, so two dispatchers racing for the same job
//! cannot both win it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fanwave_common::{AppError, AppResult, IdGenerator};
use fred::clients::Client as RedisClient;
use fred::interfaces::{
    ClientLike, HashesInterface, KeysInterface, ListInterface, SortedSetsInterface,
};
use fred::types::lists::LMoveDirection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Connect a fred client to Redis.
pub async fn connect_redis(url: &str) -> AppResult<Arc<RedisClient>> {
    let config = fred::types::config::Config::from_url(url)
        .map_err(|e| AppError::Config(format!("Invalid Redis URL: {e}")))?;

    let client = RedisClient::new(config, None, None, None);
    client.connect();
    client
        .wait_for_connect()
        .await
        .map_err(|e| AppError::Redis(e.to_string()))?;

    Ok(Arc::new(client))
}

/// Queue state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Enqueued and claimable.
    Waiting,
    /// Claimed by a dispatcher.
    Active,
    /// Scheduled for a future due time.
    Delayed,
    /// Finished successfully.
    Completed,
    /// Exhausted its attempts or hit a fatal error.
    Failed,
}

impl JobState {
    /// String form as stored in Redis.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Delayed => "delayed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the stored string form.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "delayed" => Ok(Self::Delayed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(AppError::BadRequest(format!("Unknown job state: {other}"))),
        }
    }
}

/// One durable queue job.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    /// Job ID.
    pub id: String,
    /// Job name (selects the payload type).
    pub name: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Current queue state.
    pub state: JobState,
    /// Processing attempts made so far.
    pub attempts: u32,
    /// Failure reason, when failed.
    pub failed_reason: Option<String>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job was last claimed.
    pub processed_on: Option<DateTime<Utc>>,
    /// When the job completed or failed.
    pub finished_on: Option<DateTime<Utc>>,
    /// Due time, when delayed.
    pub delay_until: Option<DateTime<Utc>>,
}

impl Job {
    fn from_hash(id: &str, map: &HashMap<String, String>) -> AppResult<Self> {
        let field = |name: &str| {
            map.get(name)
                .cloned()
                .ok_or_else(|| AppError::Queue(format!("Job {id} is missing field {name}")))
        };
        let timestamp = |name: &str| -> AppResult<Option<DateTime<Utc>>> {
            map.get(name)
                .filter(|v| !v.is_empty())
                .map(|v| {
                    DateTime::parse_from_rfc3339(v)
                        .map(|t| t.with_timezone(&Utc))
                        .map_err(|e| AppError::Queue(format!("Job {id} has bad {name}: {e}")))
                })
                .transpose()
        };

        let payload = serde_json::from_str(&field("payload")?)
            .map_err(|e| AppError::Queue(format!("Job {id} has malformed payload: {e}")))?;
        let attempts = map
            .get("attempts")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            id: id.to_string(),
            name: field("name")?,
            payload,
            state: JobState::parse(&field("state")?)?,
            attempts,
            failed_reason: map.get("failed_reason").filter(|v| !v.is_empty()).cloned(),
            created_at: timestamp("created_at")?.unwrap_or_else(Utc::now),
            processed_on: timestamp("processed_on")?,
            finished_on: timestamp("finished_on")?,
            delay_until: timestamp("delay_until")?,
        })
    }
}

/// Per-state job counts for queue introspection.
#[derive(Debug, Clone, Serialize)]
pub struct JobCounts {
    /// Claimable jobs.
    pub waiting: u64,
    /// Claimed jobs.
    pub active: u64,
    /// Jobs waiting on a due time.
    pub delayed: u64,
    /// Finished jobs.
    pub completed: u64,
    /// Failed jobs.
    pub failed: u64,
    /// Whether claiming is paused.
    pub paused: bool,
}

/// Durable job store over Redis.
#[derive(Clone)]
pub struct JobStore {
    redis: Arc<RedisClient>,
    prefix: String,
    ids: IdGenerator,
}

impl JobStore {
    /// Create a job store with the given key prefix.
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: &str) -> Self {
        Self {
            redis,
            prefix: prefix.to_string(),
            ids: IdGenerator::new(),
        }
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:queue:job:{id}", self.prefix)
    }

    fn state_key(&self, state: JobState) -> String {
        format!("{}:queue:{}", self.prefix, state.as_str())
    }

    fn paused_key(&self) -> String {
        format!("{}:queue:paused", self.prefix)
    }

    /// Enqueue a new job, optionally delayed.
    pub async fn add(
        &self,
        name: &str,
        payload: &serde_json::Value,
        delay: Option<Duration>,
    ) -> AppResult<Job> {
        let id = self.ids.generate();
        let now = Utc::now();
        let due = delay.and_then(|d| {
            chrono::TimeDelta::from_std(d)
                .ok()
                .and_then(|d| now.checked_add_signed(d))
        });
        let state = if due.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        let payload_json =
            serde_json::to_string(payload).map_err(|e| AppError::Queue(e.to_string()))?;
        let mut fields: HashMap<String, String> = HashMap::from([
            ("name".to_string(), name.to_string()),
            ("payload".to_string(), payload_json),
            ("state".to_string(), state.as_str().to_string()),
            ("attempts".to_string(), "0".to_string()),
            ("created_at".to_string(), now.to_rfc3339()),
        ]);
        if let Some(due) = due {
            fields.insert("delay_until".to_string(), due.to_rfc3339());
        }

        self.redis
            .hset::<(), _, _>(self.job_key(&id), fields)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        match due {
            Some(due) => {
                #[allow(clippy::cast_precision_loss)]
                let score = due.timestamp_millis() as f64;
                self.redis
                    .zadd::<(), _, _>(
                        self.state_key(JobState::Delayed),
                        None,
                        None,
                        false,
                        false,
                        (score, id.clone()),
                    )
                    .await
                    .map_err(|e| AppError::Redis(e.to_string()))?;
            }
            None => {
                self.redis
                    .rpush::<(), _, _>(self.state_key(JobState::Waiting), id.clone())
                    .await
                    .map_err(|e| AppError::Redis(e.to_string()))?;
            }
        }

        debug!(job_id = %id, name = %name, state = state.as_str(), "Enqueued job");

        Ok(Job {
            id,
            name: name.to_string(),
            payload: payload.clone(),
            state,
            attempts: 0,
            failed_reason: None,
            created_at: now,
            processed_on: None,
            finished_on: None,
            delay_until: due,
        })
    }

    /// Load a job by ID.
    pub async fn get_job(&self, id: &str) -> AppResult<Option<Job>> {
        let map: HashMap<String, String> = self
            .redis
            .hgetall(self.job_key(id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        if map.is_empty() {
            return Ok(None);
        }
        Job::from_hash(id, &map).map(Some)
    }

    /// Atomically claim the oldest waiting job.
    ///
    /// The winning dispatcher gets the job with its attempt counter already
    /// incremented; everyone else gets `None`. Claims nothing while the
    /// queue is paused.
    pub async fn claim(&self) -> AppResult<Option<Job>> {
        if self.is_paused().await? {
            return Ok(None);
        }

        let id: Option<String> = self
            .redis
            .lmove(
                self.state_key(JobState::Waiting),
                self.state_key(JobState::Active),
                LMoveDirection::Left,
                LMoveDirection::Right,
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let Some(id) = id else {
            return Ok(None);
        };

        let map: HashMap<String, String> = self
            .redis
            .hgetall(self.job_key(&id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        if map.is_empty() {
            // Removed while waiting; drop the orphaned list entry.
            warn!(job_id = %id, "Claimed job has no record, discarding");
            self.redis
                .lrem::<(), _, _>(self.state_key(JobState::Active), 1, id)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            return Ok(None);
        }

        let now = Utc::now();
        let attempts: i64 = self
            .redis
            .hincrby(self.job_key(&id), "attempts", 1)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .hset::<(), _, _>(
                self.job_key(&id),
                HashMap::from([
                    ("state".to_string(), JobState::Active.as_str().to_string()),
                    ("processed_on".to_string(), now.to_rfc3339()),
                ]),
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let mut job = Job::from_hash(&id, &map)?;
        job.state = JobState::Active;
        job.attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        job.processed_on = Some(now);
        Ok(Some(job))
    }

    /// Move delayed jobs whose due time has passed back to `waiting`.
    ///
    /// Returns how many were promoted.
    pub async fn promote_due(&self) -> AppResult<u64> {
        #[allow(clippy::cast_precision_loss)]
        let now_ms = Utc::now().timestamp_millis() as f64;
        let delayed = self.state_key(JobState::Delayed);
        let mut promoted = 0;

        loop {
            let popped: Vec<(String, f64)> = self
                .redis
                .zpopmin(&delayed, Some(1))
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            let Some((id, due)) = popped.into_iter().next() else {
                break;
            };

            if due > now_ms {
                // Not due yet; put it back and stop.
                self.redis
                    .zadd::<(), _, _>(&delayed, None, None, false, false, (due, id))
                    .await
                    .map_err(|e| AppError::Redis(e.to_string()))?;
                break;
            }

            self.redis
                .hset::<(), _, _>(
                    self.job_key(&id),
                    HashMap::from([
                        ("state".to_string(), JobState::Waiting.as_str().to_string()),
                        ("delay_until".to_string(), String::new()),
                    ]),
                )
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            self.redis
                .rpush::<(), _, _>(self.state_key(JobState::Waiting), id.clone())
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;

            debug!(job_id = %id, "Promoted delayed job");
            promoted += 1;
        }

        Ok(promoted)
    }

    /// Hand back active jobs whose claim is older than `older_than`.
    ///
    /// A dispatcher that dies mid-batch leaves its job in `active` with no
    /// owner; nothing else ever reads that list for work. Moving such jobs
    /// back to `waiting` keeps the attempt counter, so the retry budget
    /// still applies on the next claim. Returns how many were reclaimed.
    pub async fn reclaim_stalled(&self, older_than: Duration) -> AppResult<u64> {
        let cutoff = chrono::TimeDelta::from_std(older_than)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
            .unwrap_or_else(Utc::now);

        let active: Vec<String> = self
            .redis
            .lrange(self.state_key(JobState::Active), 0, -1)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let mut reclaimed = 0;
        for id in active {
            let processed_on: Option<String> = self
                .redis
                .hget(self.job_key(&id), "processed_on")
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            let stale = match processed_on.as_deref().filter(|v| !v.is_empty()) {
                Some(value) => match DateTime::parse_from_rfc3339(value) {
                    Ok(claimed_at) => claimed_at.with_timezone(&Utc) <= cutoff,
                    Err(_) => true,
                },
                None => true,
            };
            if !stale {
                continue;
            }

            // Another instance may finish or reclaim it between the scan and
            // here; whoever removes the list entry owns the move.
            let removed: i64 = self
                .redis
                .lrem(self.state_key(JobState::Active), 1, &id)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            if removed == 0 {
                continue;
            }

            self.redis
                .hset::<(), _, _>(
                    self.job_key(&id),
                    HashMap::from([
                        ("state".to_string(), JobState::Waiting.as_str().to_string()),
                        ("processed_on".to_string(), String::new()),
                    ]),
                )
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            self.redis
                .rpush::<(), _, _>(self.state_key(JobState::Waiting), id.clone())
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;

            warn!(job_id = %id, "Reclaimed stalled active job");
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    /// Mark an active job as completed.
    pub async fn complete(&self, id: &str) -> AppResult<()> {
        self.finish(id, JobState::Completed, None).await
    }

    /// Mark an active job as failed with a reason.
    pub async fn fail(&self, id: &str, reason: &str) -> AppResult<()> {
        self.finish(id, JobState::Failed, Some(reason)).await
    }

    async fn finish(&self, id: &str, state: JobState, reason: Option<&str>) -> AppResult<()> {
        self.redis
            .lrem::<(), _, _>(self.state_key(JobState::Active), 1, id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let mut fields = HashMap::from([
            ("state".to_string(), state.as_str().to_string()),
            ("finished_on".to_string(), Utc::now().to_rfc3339()),
        ]);
        if let Some(reason) = reason {
            fields.insert("failed_reason".to_string(), reason.to_string());
        }
        self.redis
            .hset::<(), _, _>(self.job_key(id), fields)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .rpush::<(), _, _>(self.state_key(state), id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(())
    }

    /// Put an active job back as delayed with an updated payload.
    ///
    /// Used for backoff: the attempt counter is preserved so the retry
    /// budget keeps counting.
    pub async fn reschedule(
        &self,
        id: &str,
        payload: &serde_json::Value,
        delay: Duration,
    ) -> AppResult<()> {
        let due = chrono::TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or_else(Utc::now);

        self.redis
            .lrem::<(), _, _>(self.state_key(JobState::Active), 1, id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        let payload_json =
            serde_json::to_string(payload).map_err(|e| AppError::Queue(e.to_string()))?;
        self.redis
            .hset::<(), _, _>(
                self.job_key(id),
                HashMap::from([
                    ("payload".to_string(), payload_json),
                    ("state".to_string(), JobState::Delayed.as_str().to_string()),
                    ("delay_until".to_string(), due.to_rfc3339()),
                ]),
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        #[allow(clippy::cast_precision_loss)]
        let score = due.timestamp_millis() as f64;
        self.redis
            .zadd::<(), _, _>(
                self.state_key(JobState::Delayed),
                None,
                None,
                false,
                false,
                (score, id),
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(())
    }

    /// Re-queue a completed or failed job with a fresh attempt budget.
    pub async fn retry(&self, id: &str) -> AppResult<Job> {
        let job = self
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))?;

        match job.state {
            JobState::Completed | JobState::Failed => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "Job {id} is {}, only completed or failed jobs can be retried",
                    other.as_str()
                )));
            }
        }

        self.redis
            .lrem::<(), _, _>(self.state_key(job.state), 1, id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .hset::<(), _, _>(
                self.job_key(id),
                HashMap::from([
                    ("state".to_string(), JobState::Waiting.as_str().to_string()),
                    ("attempts".to_string(), "0".to_string()),
                    ("failed_reason".to_string(), String::new()),
                    ("processed_on".to_string(), String::new()),
                    ("finished_on".to_string(), String::new()),
                    ("delay_until".to_string(), String::new()),
                ]),
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .rpush::<(), _, _>(self.state_key(JobState::Waiting), id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        self.get_job(id)
            .await?
            .ok_or_else(|| AppError::JobNotFound(id.to_string()))
    }

    /// Delete a job from every queue structure.
    pub async fn remove(&self, id: &str) -> AppResult<()> {
        if self.get_job(id).await?.is_none() {
            return Err(AppError::JobNotFound(id.to_string()));
        }

        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            self.redis
                .lrem::<(), _, _>(self.state_key(state), 0, id)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
        }
        self.redis
            .zrem::<(), _, _>(self.state_key(JobState::Delayed), id)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        self.redis
            .del::<(), _>(self.job_key(id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(())
    }

    /// List jobs in one state, oldest first.
    pub async fn list(&self, state: JobState, limit: usize) -> AppResult<Vec<Job>> {
        let stop = i64::try_from(limit).unwrap_or(i64::MAX).saturating_sub(1);
        let ids: Vec<String> = match state {
            JobState::Delayed => self
                .redis
                .zrange(self.state_key(state), 0, stop, None, false, None, false)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?,
            _ => self
                .redis
                .lrange(self.state_key(state), 0, stop)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?,
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Per-state job counts.
    pub async fn counts(&self) -> AppResult<JobCounts> {
        let waiting: u64 = self
            .redis
            .llen(self.state_key(JobState::Waiting))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let active: u64 = self
            .redis
            .llen(self.state_key(JobState::Active))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let delayed: u64 = self
            .redis
            .zcard(self.state_key(JobState::Delayed))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let completed: u64 = self
            .redis
            .llen(self.state_key(JobState::Completed))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let failed: u64 = self
            .redis
            .llen(self.state_key(JobState::Failed))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        let paused = self.is_paused().await?;

        Ok(JobCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
            paused,
        })
    }

    /// Stop handing out claims. Already-claimed jobs finish normally.
    pub async fn pause(&self) -> AppResult<()> {
        self.redis
            .set::<(), _, _>(self.paused_key(), "1", None, None, false)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    /// Resume handing out claims.
    pub async fn resume(&self) -> AppResult<()> {
        self.redis
            .del::<(), _>(self.paused_key())
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    /// Whether claiming is currently paused.
    pub async fn is_paused(&self) -> AppResult<bool> {
        let exists: i64 = self
            .redis
            .exists(self.paused_key())
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        Ok(exists > 0)
    }

    /// Whether any non-finished job (other than `exclude_id`) still carries
    /// work for this campaign.
    pub async fn has_pending_for_campaign(
        &self,
        campaign_id: &str,
        exclude_id: Option<&str>,
    ) -> AppResult<bool> {
        let mut ids: Vec<String> = Vec::new();
        for state in [JobState::Waiting, JobState::Active] {
            let mut list: Vec<String> = self
                .redis
                .lrange(self.state_key(state), 0, -1)
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            ids.append(&mut list);
        }
        let mut delayed: Vec<String> = self
            .redis
            .zrange(self.state_key(JobState::Delayed), 0, -1, None, false, None, false)
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;
        ids.append(&mut delayed);

        for id in ids {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            let payload: Option<String> = self
                .redis
                .hget(self.job_key(&id), "payload")
                .await
                .map_err(|e| AppError::Redis(e.to_string()))?;
            let Some(payload) = payload else { continue };
            let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) else {
                continue;
            };
            if value.get("campaign_id").and_then(|v| v.as_str()) == Some(campaign_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
