//! clx-sa - Semantic Annotation Pipeline microservice
//!
//! Annotates regional song-lyrics corpora with hierarchical semantic tags
//! through a staged classification cascade, driven by resumable chunked
//! jobs and watched by a statistical anomaly monitor.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use clx_common::events::EventBus;

use clx_sa::annotate::lexicon::Lexicon;
use clx_sa::annotate::{rules, Cascade};
use clx_sa::jobs::{driver, JobOrchestrator};
use clx_sa::monitor::{AnomalyMonitor, MonitorConfig};
use clx_sa::AppState;

const PORT: u16 = 5741;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting clx-sa (Semantic Annotation) microservice");
    info!("Port: {}", PORT);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve root folder, creating it if missing
    let resolver = clx_common::config::RootFolderResolver::new("semantic-annotation");
    let root_folder = resolver.resolve();

    let initializer = clx_common::config::RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let db_pool = clx_sa::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Park any jobs a previous process left running; their cursors stay
    // valid and they can be resumed through the API
    let recovered = clx_sa::db::jobs::recover_stale_jobs(&db_pool).await?;
    if recovered > 0 {
        info!(recovered, "Paused jobs left running by a previous process");
    }

    let evicted = clx_sa::db::cache::purge_expired(&db_pool).await?;
    if evicted > 0 {
        info!(evicted, "Evicted expired cache entries at startup");
    }

    let event_bus = EventBus::new(100);
    info!("Event bus initialized");

    // Assemble the cascade; without an API key stage 4 is disabled and
    // unresolved words get the sentinel
    let lexicon = Lexicon::embedded()?;
    info!(entries = lexicon.len(), "Curated lexicon loaded");

    let llm_client = match clx_sa::db::settings::llm_api_key(&db_pool).await? {
        Some(api_key) => {
            let base_url = clx_sa::db::settings::llm_base_url(&db_pool).await?;
            let model = clx_sa::db::settings::llm_model(&db_pool).await?;
            info!(base_url = %base_url, model = %model, "LLM fallback enabled");
            Some(clx_sa::annotate::llm::LlmClient::new(base_url, api_key, model)?)
        }
        None => None,
    };
    let cascade = Arc::new(Cascade::new(lexicon, rules::default_rules(), llm_client));

    let orchestrator = JobOrchestrator::new(db_pool.clone(), event_bus.clone(), cascade);

    let shutdown = CancellationToken::new();
    driver::spawn(orchestrator.clone(), shutdown.clone());
    tokio::spawn(clx_sa::annotate::refine::run(
        db_pool.clone(),
        Arc::clone(orchestrator.cascade()),
        shutdown.clone(),
    ));

    let monitor = AnomalyMonitor::new(db_pool.clone(), event_bus.clone(), MonitorConfig::default());
    monitor.spawn(shutdown.clone());

    // Hourly cache eviction sweep
    {
        let pool = db_pool.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            interval.tick().await; // startup purge already ran
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => match clx_sa::db::cache::purge_expired(&pool).await {
                        Ok(evicted) if evicted > 0 => {
                            info!(evicted, "Evicted expired cache entries");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Cache eviction sweep failed"),
                    },
                }
            }
        });
    }

    let state = AppState::new(db_pool, event_bus, orchestrator);
    let app = clx_sa::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", PORT)).await?;
    info!("Listening on http://127.0.0.1:{}", PORT);
    info!("Health check: http://127.0.0.1:{}/health", PORT);

    axum::serve(listener, app).await?;

    shutdown.cancel();
    Ok(())
}
