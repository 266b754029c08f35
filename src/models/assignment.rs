use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CompletionStatus {
    Pending,
    InProgress,
    Completed,
    Stuck,
    NeedsMoreTime,
}

/// Soft-delete marker. Deleted rows stay in the table so that a record
/// reappearing upstream can be restored in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum RecordState {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: String,
    pub student_id: String,
    pub title: String,
    pub subject: String,
    pub course: String,
    pub due_at: Option<DateTime<Utc>>,
    pub scheduled_date: Option<NaiveDate>,
    pub status: CompletionStatus,
    pub upstream_id: Option<String>,
    pub record_state: RecordState,
    pub priority: i64,
    pub estimated_minutes: Option<i64>,
    pub notes: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.record_state == RecordState::Active
    }

    pub fn is_upstream_linked(&self) -> bool {
        self.upstream_id.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssignmentRequest {
    pub title: String,
    pub subject: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub estimated_minutes: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Everything needed to insert a row. Manual entries leave `upstream_id`
/// empty; imports carry the upstream linkage and an initial status.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub student_id: String,
    pub title: String,
    pub subject: String,
    pub course: String,
    pub due_at: Option<DateTime<Utc>>,
    pub scheduled_date: Option<NaiveDate>,
    pub status: CompletionStatus,
    pub upstream_id: Option<String>,
    pub priority: i64,
    pub estimated_minutes: Option<i64>,
    pub notes: Option<String>,
}

impl NewAssignment {
    pub fn manual(student_id: &str, req: NewAssignmentRequest) -> Self {
        Self {
            student_id: student_id.to_string(),
            title: req.title,
            subject: req.subject,
            course: req.course,
            due_at: req.due_at,
            scheduled_date: req.scheduled_date,
            status: CompletionStatus::Pending,
            upstream_id: None,
            priority: req.priority,
            estimated_minutes: req.estimated_minutes,
            notes: req.notes,
        }
    }
}

/// Partial edit. For the nullable columns the outer `Option` says whether
/// the field was sent at all and the inner one carries the value, so an
/// explicit JSON `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAssignmentRequest {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub course: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub due_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub scheduled_date: Option<Option<NaiveDate>>,
    pub status: Option<CompletionStatus>,
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<Option<i64>>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub notes: Option<Option<String>>,
}

fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
