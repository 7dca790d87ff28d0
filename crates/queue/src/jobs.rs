//! Job payload definitions.

use fanwave_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use crate::store::Job;

/// Payload of one campaign batch delivery job.
///
/// The recipient list is a snapshot taken at enqueue time; the dispatcher
/// re-checks each fan's subscription status before sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendBatchJob {
    /// Campaign being delivered.
    pub campaign_id: String,
    /// Fans still to be attempted, in stable order.
    pub fan_ids: Vec<String>,
    /// Position of this batch in the original fan-out (0-indexed).
    pub batch_index: usize,
    /// Total batches in the original fan-out.
    pub batch_count: usize,
}

impl SendBatchJob {
    /// Queue job name under which these payloads are stored.
    pub const NAME: &'static str = "send-batch";

    /// Serialize into a queue payload.
    pub fn to_payload(&self) -> AppResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| AppError::Queue(e.to_string()))
    }

    /// Parse a claimed job's payload.
    pub fn from_job(job: &Job) -> AppResult<Self> {
        serde_json::from_value(job.payload.clone()).map_err(|e| {
            AppError::Queue(format!("Malformed {} payload for job {}: {e}", Self::NAME, job.id))
        })
    }
}
