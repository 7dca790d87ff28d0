//! fanwave server binary.

use std::sync::Arc;
use std::time::Duration;

use fanwave_api::AppState;
use fanwave_common::Config;
use fanwave_core::services::campaign::CampaignService;
use fanwave_core::services::mailer::build_transport;
use fanwave_core::services::recorder::DeliveryRecorder;
use fanwave_db::repositories::{CampaignRepository, EmailSentRepository, FanRepository};
use fanwave_queue::{
    BatchConfig, BatchOrchestrator, Dispatcher, JobStore, RetryConfig, SchedulerConfig,
    SendRateLimiter, connect_redis, run_scheduler,
};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fanwave=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting fanwave server...");

    let config = Config::load()?;

    let db = fanwave_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    fanwave_db::migrate(&db).await?;
    info!("Migrations completed");

    let redis = connect_redis(&config.redis.url).await?;
    info!("Connected to Redis");

    let db = Arc::new(db);
    let campaigns = CampaignRepository::new(Arc::clone(&db));
    let fans = FanRepository::new(Arc::clone(&db));
    let emails = EmailSentRepository::new(Arc::clone(&db));

    let service = CampaignService::new(campaigns.clone(), fans.clone(), emails.clone());
    let recorder = DeliveryRecorder::new(campaigns.clone(), emails.clone());
    let transport = build_transport(&config.mailer)?;
    info!(provider = %config.mailer.provider, "Mail transport ready");

    let store = JobStore::new(Arc::clone(&redis), &config.redis.prefix);
    let limiter = SendRateLimiter::new(redis, &config.redis.prefix, &config.delivery);
    let retry = RetryConfig::from_delivery(&config.delivery);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        limiter,
        transport,
        recorder.clone(),
        campaigns.clone(),
        fans.clone(),
        emails.clone(),
        retry,
        Duration::from_secs(config.delivery.claim_timeout_secs),
        &config.server.url,
    ));
    let orchestrator = BatchOrchestrator::new(
        store.clone(),
        campaigns.clone(),
        fans,
        service,
        BatchConfig::from_delivery(&config.delivery),
    );

    run_scheduler(
        SchedulerConfig::from_delivery(&config.delivery),
        Arc::clone(&dispatcher),
    );
    info!(
        tick_secs = config.delivery.tick_secs,
        max_jobs_per_tick = config.delivery.max_jobs_per_tick,
        "Delivery scheduler started"
    );

    let state = AppState {
        orchestrator,
        dispatcher,
        store,
        campaigns,
        recorder,
        admin_token: config.server.admin_token.clone().into(),
        max_jobs_per_tick: config.delivery.max_jobs_per_tick,
    };

    let app = fanwave_api::router()
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
