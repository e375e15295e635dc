//! bloodlink HTTP server binary.
//!
//! Opens the SQLite store, wires the configured providers into the
//! orchestrator, starts the periodic scheduler and serves the trigger
//! surface until Ctrl-C.
//!
//! # Environment Variables
//!
//! - `BLOODLINK_CONFIG` — path to a YAML settings file (or pass it as the
//!   first argument)
//! - `BLOODLINK_DB_PATH`, `BLOODLINK_BIND` — override the store path and
//!   the bind address
//! - provider keys such as `FAST2SMS_API_KEY`, `TWILIO_*`,
//!   `GOOGLE_MAPS_API_KEY`, `OPENROUTE_API_KEY`, `GEMINI_API_KEY`
//! - `RUST_LOG` — tracing filter (default: "info,bloodlink=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bloodlink-server -- settings.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bloodlink::explain::GeminiExplainer;
use bloodlink::orchestrator::Orchestrator;
use bloodlink::outreach::sms::SmsGateway;
use bloodlink::outreach::voice::VoiceCaller;
use bloodlink::routing::{GoogleDirections, OpenRouteService};
use bloodlink::scheduler::Scheduler;
use bloodlink::server::{app_router, AppState};
use bloodlink::{Settings, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,bloodlink=debug".into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BLOODLINK_CONFIG").ok())
        .map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;

    let store = SqliteStore::open(&settings.database_path)
        .with_context(|| format!("opening store at {}", settings.database_path.display()))?;
    tracing::info!("Store ready at {}", settings.database_path.display());

    let providers = &settings.providers;
    let timeout = providers.http_timeout();
    let mut builder = Orchestrator::builder(Arc::new(store)).policy(settings.policy.clone());
    if let Some(sms) = SmsGateway::from_settings(providers)? {
        builder = builder.notifier(Arc::new(sms));
    }
    if let Some(voice) = VoiceCaller::from_settings(providers)? {
        builder = builder.notifier(Arc::new(voice));
    }
    if let Some(key) = &providers.google_maps_api_key {
        builder = builder.route_provider(Arc::new(GoogleDirections::new(key.clone(), timeout)?));
    }
    if let Some(key) = &providers.openroute_api_key {
        builder = builder.route_provider(Arc::new(OpenRouteService::new(key.clone(), timeout)?));
    }
    if let Some(gemini) = GeminiExplainer::from_settings(providers)? {
        builder = builder.explainer(Arc::new(gemini));
    }
    let orchestrator = Arc::new(builder.build()?);

    let scheduler = Scheduler::new(orchestrator.clone(), settings.scheduler.clone());
    let jobs = scheduler.spawn();
    tracing::info!("Scheduler started with {} job(s)", jobs.len());

    let app = app_router(AppState::new(orchestrator.clone()));
    let listener = tokio::net::TcpListener::bind(&settings.bind_address)
        .await
        .with_context(|| format!("binding {}", settings.bind_address))?;
    tracing::info!("bloodlink server listening on {}", settings.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
        .context("server failed")?;

    tracing::info!("Shutting down");
    scheduler.shutdown();
    for job in jobs {
        if let Err(e) = job.await {
            tracing::warn!("Scheduler job ended abnormally: {}", e);
        }
    }
    let pending = orchestrator.outreach().drain().await;
    tracing::info!("Drained {} outreach task(s)", pending);
    Ok(())
}
