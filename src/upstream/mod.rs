pub mod dto;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::AppError;

pub use dto::{GradedSignal, UpstreamRecord};

/// Hard stop for cursor loops. Hitting it is treated as a failure since a
/// truncated snapshot would read as mass deletion.
const MAX_PAGES: usize = 200;

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Returns the complete current set of records for one student, or an
    /// error. Never a partial list.
    async fn fetch_assignments(&self, student_id: &str) -> Result<Vec<UpstreamRecord>, AppError>;
}

pub struct HttpUpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl HttpUpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build http client: {}", e)))?;
        Ok(Self { client, config })
    }

    /// Student id and cursor are opaque to us, so both go through the URL
    /// encoder rather than string splicing.
    fn assignments_url(&self, student_id: &str, cursor: Option<&str>) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| AppError::Config(format!("UPSTREAM_BASE_URL {:?}: {}", self.config.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config(format!("UPSTREAM_BASE_URL {:?} cannot take a path", self.config.base_url)))?
            .pop_if_empty()
            .extend(["students", student_id, "assignments"]);
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("cursor", cursor);
        }
        Ok(url)
    }

    async fn fetch_page(
        &self,
        student_id: &str,
        cursor: Option<&str>,
    ) -> Result<dto::AssignmentsResponse, AppError> {
        let url = self.assignments_url(student_id, cursor)?;

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::UpstreamUnavailable(format!(
                "upstream returned {}: {}",
                status, body
            )));
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("failed to read body: {}", e)))?;

        serde_json::from_str::<dto::AssignmentsResponse>(&body_text).map_err(|e| {
            warn!("Failed to parse upstream response for {}: {}", student_id, e);
            AppError::UpstreamUnavailable(format!("Failed to parse upstream response: {}", e))
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch_assignments(&self, student_id: &str) -> Result<Vec<UpstreamRecord>, AppError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for page_number in 0..MAX_PAGES {
            match self.fetch_page(student_id, cursor.as_deref()).await? {
                dto::AssignmentsResponse::List(list) => {
                    records.extend(list);
                    return Ok(records);
                }
                dto::AssignmentsResponse::Page(page) => {
                    debug!(
                        "upstream page {} for {}: {} records",
                        page_number,
                        student_id,
                        page.results.len()
                    );
                    records.extend(page.results);
                    match (page.has_more, page.next_cursor) {
                        (true, Some(next)) => cursor = Some(next),
                        (true, None) => {
                            return Err(AppError::UpstreamUnavailable(
                                "upstream reported more pages without a cursor".to_string(),
                            ));
                        }
                        (false, _) => return Ok(records),
                    }
                }
            }
        }

        Err(AppError::UpstreamUnavailable(format!(
            "gave up after {} pages for {}",
            MAX_PAGES, student_id
        )))
    }
}

/// Stand-in when no upstream is configured. It fails rather than answering
/// with an empty snapshot, which would soft-delete every linked assignment.
pub struct UnconfiguredUpstreamClient;

#[async_trait]
impl UpstreamClient for UnconfiguredUpstreamClient {
    async fn fetch_assignments(&self, _student_id: &str) -> Result<Vec<UpstreamRecord>, AppError> {
        Err(AppError::UpstreamUnavailable(
            "UPSTREAM_BASE_URL is not set".to_string(),
        ))
    }
}

/// Serves a fixed snapshot per student. Handy for wiring tests and local
/// runs without the real upstream.
#[derive(Default)]
pub struct StaticUpstreamClient {
    snapshots: std::sync::RwLock<std::collections::HashMap<String, Vec<UpstreamRecord>>>,
}

impl StaticUpstreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_snapshot(&self, student_id: &str, records: Vec<UpstreamRecord>) {
        if let Ok(mut snapshots) = self.snapshots.write() {
            snapshots.insert(student_id.to_string(), records);
        }
    }
}

#[async_trait]
impl UpstreamClient for StaticUpstreamClient {
    async fn fetch_assignments(&self, student_id: &str) -> Result<Vec<UpstreamRecord>, AppError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|_| AppError::UpstreamUnavailable("snapshot lock poisoned".to_string()))?;
        snapshots.get(student_id).cloned().ok_or_else(|| {
            AppError::UpstreamUnavailable(format!("no snapshot for student {}", student_id))
        })
    }
}
