use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// The upstream answers either with a bare array or with a cursor page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AssignmentsResponse {
    List(Vec<UpstreamRecord>),
    Page(AssignmentsPage),
}

#[derive(Debug, Deserialize)]
pub struct AssignmentsPage {
    pub results: Vec<UpstreamRecord>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub upstream_id: String,
    pub title: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub graded_signal: Option<GradedSignal>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
}

impl UpstreamRecord {
    pub fn new(upstream_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            title: title.into(),
            due_at: None,
            graded_signal: None,
            subject: None,
            course: None,
        }
    }

    pub fn graded(mut self, graded: bool) -> Self {
        self.graded_signal = Some(GradedSignal::Flag(graded));
        self
    }

    pub fn due(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = Some(due_at);
        self
    }

    /// A missing signal means not graded.
    pub fn is_graded(&self) -> bool {
        self.graded_signal
            .as_ref()
            .is_some_and(GradedSignal::is_graded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GradedSignal {
    Flag(bool),
    Score(f64),
    State(String),
}

impl GradedSignal {
    pub fn is_graded(&self) -> bool {
        match self {
            GradedSignal::Flag(flag) => *flag,
            GradedSignal::Score(score) => score.is_finite(),
            GradedSignal::State(state) => matches!(
                state.trim().to_ascii_lowercase().as_str(),
                "graded" | "complete" | "completed"
            ),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}
