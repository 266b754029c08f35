use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::db::repository;
use crate::error::AppError;
use crate::models::{Assignment, CompletionStatus, NewAssignment, RecordState};
use crate::upstream::{UpstreamClient, UpstreamRecord};

const DEFAULT_SUBJECT: &str = "General";

#[derive(Clone)]
pub struct Reconciler {
    db: SqlitePool,
    upstream: Arc<dyn UpstreamClient>,
    fetch_timeout: Option<Duration>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub student_id: String,
    pub imported: usize,
    pub soft_deleted: usize,
    pub restored: usize,
    pub completed: usize,
    pub reopened: usize,
    pub unchanged: usize,
    pub conflicts_skipped: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn new(student_id: &str) -> Self {
        Self {
            student_id: student_id.to_string(),
            ..Default::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.imported + self.soft_deleted + self.restored + self.completed + self.reopened
    }
}

#[derive(Debug, Serialize)]
pub struct StudentSyncOutcome {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncAction {
    SoftDelete,
    Restore,
    SetStatus(CompletionStatus),
}

/// What reconciliation wants done to one local row, given the matching
/// upstream record (if any). Manual rows never get actions.
fn plan(local: &Assignment, record: Option<&UpstreamRecord>) -> Vec<SyncAction> {
    if !local.is_upstream_linked() {
        return Vec::new();
    }

    let mut actions = Vec::new();
    let Some(record) = record else {
        if local.record_state == RecordState::Active {
            actions.push(SyncAction::SoftDelete);
        }
        return actions;
    };

    if local.record_state == RecordState::Deleted {
        actions.push(SyncAction::Restore);
    }

    match (record.is_graded(), local.status) {
        (true, CompletionStatus::Pending) => {
            actions.push(SyncAction::SetStatus(CompletionStatus::Completed))
        }
        (false, CompletionStatus::Completed) => {
            actions.push(SyncAction::SetStatus(CompletionStatus::Pending))
        }
        _ => {}
    }

    actions
}

/// A snapshot with blank or repeated ids is rejected whole: acting on part of
/// it could soft-delete rows that are still present upstream.
fn validate_snapshot(snapshot: &[UpstreamRecord]) -> Result<(), AppError> {
    let mut seen = HashSet::new();
    for record in snapshot {
        let id = record.upstream_id.trim();
        if id.is_empty() {
            return Err(AppError::UpstreamUnavailable(format!(
                "malformed snapshot: record {:?} has no upstream id",
                record.title
            )));
        }
        if !seen.insert(id) {
            return Err(AppError::UpstreamUnavailable(format!(
                "malformed snapshot: upstream id {} appears twice",
                id
            )));
        }
    }
    Ok(())
}

impl Reconciler {
    pub fn new(db: SqlitePool, upstream: Arc<dyn UpstreamClient>) -> Self {
        Self {
            db,
            upstream,
            fetch_timeout: None,
        }
    }

    /// Bounds the upstream fetch on top of whatever the client itself does.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub async fn run_reconciliation(&self, student_id: &str) -> Result<ReconcileReport, AppError> {
        info!("Fetching upstream snapshot for {}", student_id);
        let fetch = self.upstream.fetch_assignments(student_id);
        let snapshot = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch).await.map_err(|_| {
                AppError::UpstreamUnavailable(format!(
                    "upstream fetch for {} timed out after {:?}",
                    student_id, limit
                ))
            })??,
            None => fetch.await?,
        };

        self.reconcile(student_id, &snapshot).await
    }

    /// Brings the student's linked assignments in line with `snapshot`, which
    /// must be the complete upstream state for that student.
    pub async fn reconcile(
        &self,
        student_id: &str,
        snapshot: &[UpstreamRecord],
    ) -> Result<ReconcileReport, AppError> {
        validate_snapshot(snapshot)?;
        let locals = repository::fetch_assignments(&self.db, student_id, true).await?;
        self.reconcile_rows(student_id, snapshot, locals).await
    }

    async fn reconcile_rows(
        &self,
        student_id: &str,
        snapshot: &[UpstreamRecord],
        locals: Vec<Assignment>,
    ) -> Result<ReconcileReport, AppError> {
        let mut report = ReconcileReport::new(student_id);
        let by_upstream_id: HashMap<&str, &UpstreamRecord> = snapshot
            .iter()
            .map(|r| (r.upstream_id.trim(), r))
            .collect();

        let mut known: HashSet<String> = HashSet::new();

        for local in locals.into_iter().filter(Assignment::is_upstream_linked) {
            let upstream_id = local.upstream_id.clone().unwrap_or_default();
            let record = by_upstream_id.get(upstream_id.as_str()).copied();
            known.insert(upstream_id);

            let actions = plan(&local, record);
            if actions.is_empty() {
                report.unchanged += 1;
                continue;
            }

            match self.apply(&local, &actions, &mut report).await {
                Ok(()) => {}
                Err(AppError::DataIntegrityConflict { .. }) => {
                    self.retry_after_conflict(&local.id, record, &mut report).await;
                }
                Err(e) => {
                    error!("Failed to reconcile assignment {}: {}", local.id, e);
                    report.failed += 1;
                }
            }
        }

        for record in snapshot {
            if known.contains(record.upstream_id.trim()) {
                continue;
            }
            match self.import(student_id, record).await {
                Ok(created) => {
                    info!("Imported upstream {} as {}", record.upstream_id, created.id);
                    report.imported += 1;
                }
                Err(e) => {
                    error!("Failed to import upstream {}: {}", record.upstream_id, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Reconciled {}: imported={} soft_deleted={} restored={} completed={} reopened={} unchanged={} conflicts_skipped={} failed={}",
            student_id,
            report.imported,
            report.soft_deleted,
            report.restored,
            report.completed,
            report.reopened,
            report.unchanged,
            report.conflicts_skipped,
            report.failed
        );
        Ok(report)
    }

    async fn retry_after_conflict(
        &self,
        assignment_id: &str,
        record: Option<&UpstreamRecord>,
        report: &mut ReconcileReport,
    ) {
        warn!("Assignment {} changed during sync, retrying", assignment_id);

        let fresh = match repository::find_assignment_by_id(&self.db, assignment_id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                // Deleted by the user meanwhile; nothing left to reconcile.
                warn!("Assignment {} disappeared during sync", assignment_id);
                report.conflicts_skipped += 1;
                return;
            }
            Err(e) => {
                error!("Failed to re-read assignment {}: {}", assignment_id, e);
                report.failed += 1;
                return;
            }
        };

        let actions = plan(&fresh, record);
        if actions.is_empty() {
            report.unchanged += 1;
            return;
        }

        match self.apply(&fresh, &actions, report).await {
            Ok(()) => {}
            Err(AppError::DataIntegrityConflict { .. }) => {
                warn!("Skipping assignment {} after repeated conflict", assignment_id);
                report.conflicts_skipped += 1;
            }
            Err(e) => {
                error!("Failed to reconcile assignment {}: {}", assignment_id, e);
                report.failed += 1;
            }
        }
    }

    async fn apply(
        &self,
        local: &Assignment,
        actions: &[SyncAction],
        report: &mut ReconcileReport,
    ) -> Result<(), AppError> {
        let mut version = local.version;

        for action in actions {
            let applied = match action {
                SyncAction::SoftDelete => {
                    repository::soft_delete(&self.db, &local.id, version).await?
                }
                SyncAction::Restore => repository::restore(&self.db, &local.id, version).await?,
                SyncAction::SetStatus(status) => {
                    repository::set_completion_status(&self.db, &local.id, version, *status)
                        .await?
                }
            };

            if !applied {
                return Err(AppError::DataIntegrityConflict {
                    assignment_id: local.id.clone(),
                });
            }
            version += 1;

            match action {
                SyncAction::SoftDelete => report.soft_deleted += 1,
                SyncAction::Restore => report.restored += 1,
                SyncAction::SetStatus(CompletionStatus::Completed) => report.completed += 1,
                SyncAction::SetStatus(_) => report.reopened += 1,
            }
        }

        Ok(())
    }

    async fn import(
        &self,
        student_id: &str,
        record: &UpstreamRecord,
    ) -> Result<Assignment, AppError> {
        let status = if record.is_graded() {
            CompletionStatus::Completed
        } else {
            CompletionStatus::Pending
        };
        let course = record.course.clone().unwrap_or_default();
        let subject = record
            .subject
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(course.clone()).filter(|c| !c.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let created = repository::insert_assignment(
            &self.db,
            NewAssignment {
                student_id: student_id.to_string(),
                title: record.title.clone(),
                subject,
                course,
                due_at: record.due_at,
                scheduled_date: None,
                status,
                upstream_id: Some(record.upstream_id.trim().to_string()),
                priority: 0,
                estimated_minutes: None,
                notes: None,
            },
        )
        .await?;
        Ok(created)
    }

    /// Reconciles every known student concurrently. A failure stays with the
    /// student it happened to.
    pub async fn reconcile_all(&self) -> Result<Vec<StudentSyncOutcome>, AppError> {
        let students = repository::list_student_ids(&self.db).await?;
        let mut tasks = JoinSet::new();

        for student_id in students {
            let reconciler = self.clone();
            tasks.spawn(async move {
                let result = reconciler.run_reconciliation(&student_id).await;
                (student_id, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((student_id, Ok(report))) => outcomes.push(StudentSyncOutcome {
                    student_id,
                    report: Some(report),
                    error: None,
                }),
                Ok((student_id, Err(e))) => {
                    warn!("Sync failed for {}: {}", student_id, e);
                    outcomes.push(StudentSyncOutcome {
                        student_id,
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
                Err(e) => error!("Sync task panicked: {}", e),
            }
        }

        outcomes.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::models::UpdateAssignmentRequest;
    use crate::upstream::StaticUpstreamClient;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test db");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");
        pool
    }

    fn linked(upstream_id: &str, state: RecordState, status: CompletionStatus) -> Assignment {
        Assignment {
            id: format!("local-{}", upstream_id),
            student_id: "s1".to_string(),
            title: "Worksheet".to_string(),
            subject: "Math".to_string(),
            course: String::new(),
            due_at: None,
            scheduled_date: None,
            status,
            upstream_id: Some(upstream_id.to_string()),
            record_state: state,
            priority: 0,
            estimated_minutes: None,
            notes: None,
            version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn plan_covers_each_rule() {
        let record = UpstreamRecord::new("1", "Worksheet");

        let active = linked("1", RecordState::Active, CompletionStatus::Pending);
        assert_eq!(plan(&active, None), vec![SyncAction::SoftDelete]);
        assert!(plan(&active, Some(&record)).is_empty());
        assert_eq!(
            plan(&active, Some(&record.clone().graded(true))),
            vec![SyncAction::SetStatus(CompletionStatus::Completed)]
        );

        let deleted = linked("1", RecordState::Deleted, CompletionStatus::Completed);
        assert!(plan(&deleted, None).is_empty());
        assert_eq!(
            plan(&deleted, Some(&record)),
            vec![
                SyncAction::Restore,
                SyncAction::SetStatus(CompletionStatus::Pending)
            ]
        );

        let stuck = linked("1", RecordState::Active, CompletionStatus::Stuck);
        assert!(plan(&stuck, Some(&record.clone().graded(true))).is_empty());

        let mut manual = linked("1", RecordState::Active, CompletionStatus::Pending);
        manual.upstream_id = None;
        assert!(plan(&manual, None).is_empty());
    }

    #[test]
    fn malformed_snapshots_are_rejected() {
        let blank = vec![UpstreamRecord::new("  ", "No id")];
        assert!(matches!(
            validate_snapshot(&blank),
            Err(AppError::UpstreamUnavailable(_))
        ));

        let doubled = vec![UpstreamRecord::new("7", "A"), UpstreamRecord::new("7", "B")];
        assert!(validate_snapshot(&doubled).is_err());
    }

    #[tokio::test]
    async fn conflicting_write_is_retried_with_fresh_read() {
        let pool = setup_test_db().await;
        let reconciler = Reconciler::new(pool.clone(), Arc::new(StaticUpstreamClient::new()));
        let snapshot = vec![UpstreamRecord::new("42", "Chapter 4 questions")];

        reconciler.reconcile("s1", &snapshot).await.unwrap();
        let stale = repository::fetch_assignments(&pool, "s1", true).await.unwrap();

        // A user edit lands between the read and the write.
        repository::update_assignment(
            &pool,
            &stale[0].id,
            UpdateAssignmentRequest {
                notes: Some(Some("ask about #3".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let graded = vec![UpstreamRecord::new("42", "Chapter 4 questions").graded(true)];
        let report = reconciler.reconcile_rows("s1", &graded, stale).await.unwrap();

        assert_eq!(report.completed, 1);
        assert_eq!(report.conflicts_skipped, 0);
        let stored = repository::find_by_upstream_id(&pool, "s1", "42")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, CompletionStatus::Completed);
        assert_eq!(stored.notes.as_deref(), Some("ask about #3"));
    }

    #[tokio::test]
    async fn row_deleted_before_retry_is_skipped_not_reimported() {
        let pool = setup_test_db().await;
        let reconciler = Reconciler::new(pool.clone(), Arc::new(StaticUpstreamClient::new()));
        let snapshot = vec![
            UpstreamRecord::new("42", "Chapter 4 questions"),
            UpstreamRecord::new("43", "Chapter 5 questions"),
        ];

        reconciler.reconcile("s1", &snapshot).await.unwrap();
        let stale = repository::fetch_assignments(&pool, "s1", true).await.unwrap();

        // The user removes one row while the sync still holds the old read.
        let doomed = repository::find_by_upstream_id(&pool, "s1", "42")
            .await
            .unwrap()
            .unwrap();
        assert!(repository::delete_assignment(&pool, &doomed.id).await.unwrap());

        let graded = vec![
            UpstreamRecord::new("42", "Chapter 4 questions").graded(true),
            UpstreamRecord::new("43", "Chapter 5 questions").graded(true),
        ];
        let report = reconciler.reconcile_rows("s1", &graded, stale).await.unwrap();

        assert_eq!(report.conflicts_skipped, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.imported, 0);
        assert!(repository::find_by_upstream_id(&pool, "s1", "42")
            .await
            .unwrap()
            .is_none());
        let other = repository::find_by_upstream_id(&pool, "s1", "43")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.status, CompletionStatus::Completed);
    }

    #[tokio::test]
    async fn import_uses_course_as_subject_fallback() {
        let pool = setup_test_db().await;
        let reconciler = Reconciler::new(pool.clone(), Arc::new(StaticUpstreamClient::new()));

        let mut record = UpstreamRecord::new(" 15 ", "Map quiz").graded(true);
        record.course = Some("Geography".to_string());
        let report = reconciler.reconcile("s1", &[record]).await.unwrap();
        assert_eq!(report.imported, 1);

        let stored = repository::find_by_upstream_id(&pool, "s1", "15")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.subject, "Geography");
        assert_eq!(stored.status, CompletionStatus::Completed);
    }
}
