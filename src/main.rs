use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use studyblock::api::router;
use studyblock::config::AppConfig;
use studyblock::services::SyncScheduler;
use studyblock::state::AppState;
use studyblock::upstream::{HttpUpstreamClient, UnconfiguredUpstreamClient, UpstreamClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "studyblock=debug".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::new_from_env()?;
    let pool = studyblock::connect_database(&config.database_url).await?;

    let upstream: Arc<dyn UpstreamClient> = match &config.upstream {
        Some(upstream) => {
            info!("upstream source: {}", upstream.base_url);
            Arc::new(HttpUpstreamClient::new(upstream.clone())?)
        }
        None => {
            warn!("UPSTREAM_BASE_URL is not set; reconciliation will report the upstream as unavailable");
            Arc::new(UnconfiguredUpstreamClient)
        }
    };

    let addr = config.bind_addr;
    let state = AppState {
        db: pool.clone(),
        upstream,
        config: Arc::new(config),
    };

    if let Some(interval) = state.config.sync_interval_secs {
        let scheduler = SyncScheduler::new(state.reconciler(), interval);
        tokio::spawn(scheduler.start());
    }

    let app = router(state);

    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
