use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::services::Reconciler;
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub upstream: Arc<dyn UpstreamClient>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn reconciler(&self) -> Reconciler {
        let reconciler = Reconciler::new(self.db.clone(), self.upstream.clone());
        match &self.config.upstream {
            Some(upstream) => reconciler.with_fetch_timeout(upstream.timeout),
            None => reconciler,
        }
    }
}
