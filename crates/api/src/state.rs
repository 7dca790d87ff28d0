//! Application state shared across handlers.

use std::sync::Arc;

use fanwave_core::services::recorder::DeliveryRecorder;
use fanwave_db::repositories::CampaignRepository;
use fanwave_queue::{BatchOrchestrator, Dispatcher, JobStore};

/// Application state.
#[derive(Clone)]
pub struct AppState {
    /// Campaign fan-out.
    pub orchestrator: BatchOrchestrator,
    /// Batch processor, for the external-trigger tick.
    pub dispatcher: Arc<Dispatcher>,
    /// Queue inspection and control.
    pub store: JobStore,
    /// Campaign lookups.
    pub campaigns: CampaignRepository,
    /// Delivery-event recording.
    pub recorder: DeliveryRecorder,
    /// Bearer token required on management routes.
    pub admin_token: Arc<str>,
    /// Upper bound on jobs per external-trigger tick.
    pub max_jobs_per_tick: usize,
}
