use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{
    Assignment, BlockStatus, CompletionStatus, DailyScheduleStatus, NewAssignment,
    NewTemplateBlockRequest, RecordState, ScheduleTemplateBlock, UpdateAssignmentRequest,
};

const ASSIGNMENT_COLUMNS: &str = "id, student_id, title, subject, course, due_at, scheduled_date, status, upstream_id, record_state, priority, estimated_minutes, notes, version, created_at, updated_at";

const BLOCK_COLUMNS: &str =
    "id, student_id, weekday, block_number, start_time, end_time, block_type, subject";

pub async fn insert_assignment(
    db: &SqlitePool,
    new: NewAssignment,
) -> Result<Assignment, sqlx::Error> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO assignments
            (id, student_id, title, subject, course, due_at, scheduled_date, status,
            upstream_id, record_state, priority, estimated_minutes, notes, version,
            created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, ?14, ?14)
        "#,
    )
    .bind(&id)
    .bind(&new.student_id)
    .bind(&new.title)
    .bind(&new.subject)
    .bind(&new.course)
    .bind(new.due_at)
    .bind(new.scheduled_date)
    .bind(new.status)
    .bind(&new.upstream_id)
    .bind(RecordState::Active)
    .bind(new.priority)
    .bind(new.estimated_minutes)
    .bind(&new.notes)
    .bind(now)
    .execute(db)
    .await?;

    Ok(Assignment {
        id,
        student_id: new.student_id,
        title: new.title,
        subject: new.subject,
        course: new.course,
        due_at: new.due_at,
        scheduled_date: new.scheduled_date,
        status: new.status,
        upstream_id: new.upstream_id,
        record_state: RecordState::Active,
        priority: new.priority,
        estimated_minutes: new.estimated_minutes,
        notes: new.notes,
        version: 0,
        created_at: now,
        updated_at: now,
    })
}

pub async fn fetch_assignments(
    db: &SqlitePool,
    student_id: &str,
    include_inactive: bool,
) -> Result<Vec<Assignment>, sqlx::Error> {
    let sql = if include_inactive {
        format!(
            "SELECT {} FROM assignments WHERE student_id = ?1 ORDER BY rowid",
            ASSIGNMENT_COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM assignments WHERE student_id = ?1 AND record_state = 'active' ORDER BY rowid",
            ASSIGNMENT_COLUMNS
        )
    };

    sqlx::query_as::<_, Assignment>(&sql)
        .bind(student_id)
        .fetch_all(db)
        .await
}

pub async fn find_assignment_by_id(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query_as::<_, Assignment>(&format!(
        "SELECT {} FROM assignments WHERE id = ?",
        ASSIGNMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

pub async fn find_by_upstream_id(
    db: &SqlitePool,
    student_id: &str,
    upstream_id: &str,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query_as::<_, Assignment>(&format!(
        "SELECT {} FROM assignments WHERE student_id = ? AND upstream_id = ?",
        ASSIGNMENT_COLUMNS
    ))
    .bind(student_id)
    .bind(upstream_id)
    .fetch_optional(db)
    .await
}

/// Active, not yet completed, and either unscheduled or scheduled on or
/// before `date`. Rows come back in insertion order.
pub async fn fetch_pending_for_date(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
) -> Result<Vec<Assignment>, sqlx::Error> {
    sqlx::query_as::<_, Assignment>(&format!(
        r#"
        SELECT {}
        FROM assignments
        WHERE student_id = ?1
          AND record_state = 'active'
          AND status != 'completed'
          AND (scheduled_date IS NULL OR scheduled_date <= ?2)
        ORDER BY rowid
        "#,
        ASSIGNMENT_COLUMNS
    ))
    .bind(student_id)
    .bind(date)
    .fetch_all(db)
    .await
}

/// Returns `false` when the row is gone or its version moved past
/// `expected_version`.
pub async fn set_completion_status(
    db: &SqlitePool,
    id: &str,
    expected_version: i64,
    status: CompletionStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE assignments
        SET status = ?1,
            version = version + 1,
            updated_at = ?2
        WHERE id = ?3 AND version = ?4
        "#,
    )
    .bind(status)
    .bind(Utc::now())
    .bind(id)
    .bind(expected_version)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

pub async fn soft_delete(
    db: &SqlitePool,
    id: &str,
    expected_version: i64,
) -> Result<bool, sqlx::Error> {
    set_record_state(db, id, expected_version, RecordState::Deleted).await
}

pub async fn restore(
    db: &SqlitePool,
    id: &str,
    expected_version: i64,
) -> Result<bool, sqlx::Error> {
    set_record_state(db, id, expected_version, RecordState::Active).await
}

async fn set_record_state(
    db: &SqlitePool,
    id: &str,
    expected_version: i64,
    state: RecordState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE assignments
        SET record_state = ?1,
            version = version + 1,
            updated_at = ?2
        WHERE id = ?3 AND version = ?4
        "#,
    )
    .bind(state)
    .bind(Utc::now())
    .bind(id)
    .bind(expected_version)
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

pub async fn update_assignment(
    db: &SqlitePool,
    id: &str,
    req: UpdateAssignmentRequest,
) -> Result<Option<Assignment>, sqlx::Error> {
    let mut current = match find_assignment_by_id(db, id).await? {
        Some(a) => a,
        None => return Ok(None),
    };

    if let Some(title) = req.title {
        current.title = title;
    }
    if let Some(subject) = req.subject {
        current.subject = subject;
    }
    if let Some(course) = req.course {
        current.course = course;
    }
    if let Some(due_at) = req.due_at {
        current.due_at = due_at;
    }
    if let Some(scheduled_date) = req.scheduled_date {
        current.scheduled_date = scheduled_date;
    }
    if let Some(status) = req.status {
        current.status = status;
    }
    if let Some(priority) = req.priority {
        current.priority = priority;
    }
    if let Some(estimated_minutes) = req.estimated_minutes {
        current.estimated_minutes = estimated_minutes;
    }
    if let Some(notes) = req.notes {
        current.notes = notes;
    }

    sqlx::query(
        r#"
        UPDATE assignments
        SET title = ?1,
            subject = ?2,
            course = ?3,
            due_at = ?4,
            scheduled_date = ?5,
            status = ?6,
            priority = ?7,
            estimated_minutes = ?8,
            notes = ?9,
            version = version + 1,
            updated_at = ?10
        WHERE id = ?11
        "#,
    )
    .bind(&current.title)
    .bind(&current.subject)
    .bind(&current.course)
    .bind(current.due_at)
    .bind(current.scheduled_date)
    .bind(current.status)
    .bind(current.priority)
    .bind(current.estimated_minutes)
    .bind(&current.notes)
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;

    // User edits win; the version bump makes any in-flight sync re-read.
    find_assignment_by_id(db, id).await
}

/// Physical removal. Only reachable from an explicit user action.
pub async fn delete_assignment(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM assignments WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?
        .rows_affected();

    Ok(result > 0)
}

pub async fn list_student_ids(db: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT student_id FROM assignments
        UNION
        SELECT student_id FROM schedule_template_blocks
        ORDER BY student_id
        "#,
    )
    .fetch_all(db)
    .await
}

pub async fn insert_template_block(
    db: &SqlitePool,
    student_id: &str,
    req: NewTemplateBlockRequest,
) -> Result<ScheduleTemplateBlock, sqlx::Error> {
    let id = sqlx::query(
        r#"
        INSERT INTO schedule_template_blocks
            (student_id, weekday, block_number, start_time, end_time, block_type, subject)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(student_id)
    .bind(req.weekday)
    .bind(req.block_number)
    .bind(req.start_time)
    .bind(req.end_time)
    .bind(req.block_type)
    .bind(&req.subject)
    .execute(db)
    .await?
    .last_insert_rowid();

    Ok(ScheduleTemplateBlock {
        id,
        student_id: student_id.to_string(),
        weekday: req.weekday,
        block_number: req.block_number,
        start_time: req.start_time,
        end_time: req.end_time,
        block_type: req.block_type,
        subject: req.subject,
    })
}

pub async fn fetch_blocks_for_weekday(
    db: &SqlitePool,
    student_id: &str,
    weekday: i64,
) -> Result<Vec<ScheduleTemplateBlock>, sqlx::Error> {
    sqlx::query_as::<_, ScheduleTemplateBlock>(&format!(
        r#"
        SELECT {}
        FROM schedule_template_blocks
        WHERE student_id = ?1 AND weekday = ?2
        ORDER BY start_time, block_number, id
        "#,
        BLOCK_COLUMNS
    ))
    .bind(student_id)
    .bind(weekday)
    .fetch_all(db)
    .await
}

pub async fn find_template_block(
    db: &SqlitePool,
    id: i64,
) -> Result<Option<ScheduleTemplateBlock>, sqlx::Error> {
    sqlx::query_as::<_, ScheduleTemplateBlock>(&format!(
        "SELECT {} FROM schedule_template_blocks WHERE id = ?",
        BLOCK_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await
}

/// Materializes the `not-started` row on first access; later calls only read.
pub async fn ensure_block_status(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    block_id: i64,
) -> Result<DailyScheduleStatus, sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO daily_schedule_status (student_id, schedule_date, block_id, status, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (student_id, schedule_date, block_id) DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(date)
    .bind(block_id)
    .bind(BlockStatus::NotStarted)
    .bind(Utc::now())
    .execute(db)
    .await?;

    sqlx::query_as::<_, DailyScheduleStatus>(
        r#"
        SELECT student_id, schedule_date, block_id, status, updated_at
        FROM daily_schedule_status
        WHERE student_id = ?1 AND schedule_date = ?2 AND block_id = ?3
        "#,
    )
    .bind(student_id)
    .bind(date)
    .bind(block_id)
    .fetch_one(db)
    .await
}

/// Last write wins. Writing the value already stored touches nothing and
/// returns `false`.
pub async fn upsert_block_status(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    block_id: i64,
    status: BlockStatus,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO daily_schedule_status (student_id, schedule_date, block_id, status, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (student_id, schedule_date, block_id)
        DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at
        WHERE daily_schedule_status.status != excluded.status
        "#,
    )
    .bind(student_id)
    .bind(date)
    .bind(block_id)
    .bind(status)
    .bind(Utc::now())
    .execute(db)
    .await?
    .rows_affected();

    Ok(result > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveTime};
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::models::BlockType;

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

    fn new_assignment(student_id: &str, title: &str, upstream_id: Option<&str>) -> NewAssignment {
        NewAssignment {
            student_id: student_id.to_string(),
            title: title.to_string(),
            subject: "Math".to_string(),
            course: "Algebra I".to_string(),
            due_at: Some(Utc::now() + Duration::days(1)),
            scheduled_date: None,
            status: CompletionStatus::Pending,
            upstream_id: upstream_id.map(str::to_string),
            priority: 0,
            estimated_minutes: Some(30),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_assignment() {
        let pool = setup_test_db().await;

        let created = insert_assignment(&pool, new_assignment("s1", "Worksheet 3", Some("42")))
            .await
            .expect("Failed to insert assignment");
        assert_eq!(created.version, 0);
        assert!(created.is_active());

        let listed = fetch_assignments(&pool, "s1", false)
            .await
            .expect("Failed to fetch assignments");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, created.id);
        assert_eq!(listed[0].status, CompletionStatus::Pending);

        let found = find_by_upstream_id(&pool, "s1", "42")
            .await
            .expect("Failed to query by upstream id")
            .expect("Assignment not found");
        assert_eq!(found.id, created.id);

        assert!(fetch_assignments(&pool, "s2", true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_soft_delete_and_restore() {
        let pool = setup_test_db().await;
        let created = insert_assignment(&pool, new_assignment("s1", "Essay", Some("7")))
            .await
            .unwrap();

        assert!(soft_delete(&pool, &created.id, 0).await.unwrap());
        assert!(fetch_assignments(&pool, "s1", false).await.unwrap().is_empty());

        let all = fetch_assignments(&pool, "s1", true).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record_state, RecordState::Deleted);
        assert_eq!(all[0].version, 1);

        assert!(restore(&pool, &created.id, 1).await.unwrap());
        let restored = find_assignment_by_id(&pool, &created.id).await.unwrap().unwrap();
        assert!(restored.is_active());
        assert_eq!(restored.version, 2);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let pool = setup_test_db().await;
        let created = insert_assignment(&pool, new_assignment("s1", "Lab report", Some("9")))
            .await
            .unwrap();

        assert!(set_completion_status(&pool, &created.id, 0, CompletionStatus::Completed)
            .await
            .unwrap());
        assert!(!set_completion_status(&pool, &created.id, 0, CompletionStatus::Pending)
            .await
            .unwrap());

        let stored = find_assignment_by_id(&pool, &created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CompletionStatus::Completed);
    }

    #[tokio::test]
    async fn test_pending_for_date_filters() {
        let pool = setup_test_db().await;
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let open = insert_assignment(&pool, new_assignment("s1", "Open", None)).await.unwrap();

        let mut later = new_assignment("s1", "Later", None);
        later.scheduled_date = Some(today + Duration::days(2));
        insert_assignment(&pool, later).await.unwrap();

        let mut done = new_assignment("s1", "Done", None);
        done.status = CompletionStatus::Completed;
        insert_assignment(&pool, done).await.unwrap();

        let mut stuck = new_assignment("s1", "Stuck", None);
        stuck.status = CompletionStatus::Stuck;
        stuck.scheduled_date = Some(today);
        let stuck = insert_assignment(&pool, stuck).await.unwrap();

        let gone = insert_assignment(&pool, new_assignment("s1", "Gone", Some("1")))
            .await
            .unwrap();
        soft_delete(&pool, &gone.id, 0).await.unwrap();

        let pending = fetch_pending_for_date(&pool, "s1", today).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec![open.id.as_str(), stuck.id.as_str()]);
    }

    #[tokio::test]
    async fn test_update_and_delete_assignment() {
        let pool = setup_test_db().await;
        let created = insert_assignment(&pool, new_assignment("s1", "Reading", None))
            .await
            .unwrap();

        let updated = update_assignment(
            &pool,
            &created.id,
            UpdateAssignmentRequest {
                title: Some("Reading ch. 4".to_string()),
                status: Some(CompletionStatus::InProgress),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .expect("Assignment not found");
        assert_eq!(updated.title, "Reading ch. 4");
        assert_eq!(updated.status, CompletionStatus::InProgress);
        assert_eq!(updated.version, 1);

        assert!(delete_assignment(&pool, &created.id).await.unwrap());
        assert!(find_assignment_by_id(&pool, &created.id).await.unwrap().is_none());
        assert!(!delete_assignment(&pool, &created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_clears_nullable_fields() {
        let pool = setup_test_db().await;
        let created = insert_assignment(&pool, new_assignment("s1", "Essay", None))
            .await
            .unwrap();

        let noted = update_assignment(
            &pool,
            &created.id,
            UpdateAssignmentRequest {
                notes: Some(Some("outline first".to_string())),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(noted.notes.as_deref(), Some("outline first"));

        let cleared = update_assignment(
            &pool,
            &created.id,
            UpdateAssignmentRequest {
                due_at: Some(None),
                estimated_minutes: Some(None),
                notes: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert!(cleared.due_at.is_none());
        assert!(cleared.estimated_minutes.is_none());
        assert!(cleared.notes.is_none());
        assert_eq!(cleared.title, "Essay");
        assert_eq!(cleared.version, 2);
    }

    #[tokio::test]
    async fn test_blocks_ordered_by_start_time() {
        let pool = setup_test_db().await;
        let at = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();

        for (number, hour, block_type) in [
            (2, 10, BlockType::Assignment),
            (1, 8, BlockType::Bible),
            (3, 12, BlockType::Lunch),
        ] {
            insert_template_block(
                &pool,
                "s1",
                NewTemplateBlockRequest {
                    weekday: 0,
                    block_number: number,
                    start_time: at(hour),
                    end_time: at(hour + 1),
                    block_type,
                    subject: None,
                },
            )
            .await
            .unwrap();
        }

        let blocks = fetch_blocks_for_weekday(&pool, "s1", 0).await.unwrap();
        let numbers: Vec<i64> = blocks.iter().map(|b| b.block_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(fetch_blocks_for_weekday(&pool, "s1", 1).await.unwrap().is_empty());

        let students = list_student_ids(&pool).await.unwrap();
        assert_eq!(students, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_block_status_lazy_and_idempotent() {
        let pool = setup_test_db().await;
        let block = insert_template_block(
            &pool,
            "s1",
            NewTemplateBlockRequest {
                weekday: 0,
                block_number: 1,
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                block_type: BlockType::Bible,
                subject: None,
            },
        )
        .await
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let first = ensure_block_status(&pool, "s1", date, block.id).await.unwrap();
        assert_eq!(first.status, BlockStatus::NotStarted);

        assert!(upsert_block_status(&pool, "s1", date, block.id, BlockStatus::InProgress)
            .await
            .unwrap());
        assert!(!upsert_block_status(&pool, "s1", date, block.id, BlockStatus::InProgress)
            .await
            .unwrap());

        let again = ensure_block_status(&pool, "s1", date, block.id).await.unwrap();
        assert_eq!(again.status, BlockStatus::InProgress);

        let next_day = ensure_block_status(&pool, "s1", date.succ_opt().unwrap(), block.id)
            .await
            .unwrap();
        assert_eq!(next_day.status, BlockStatus::NotStarted);
    }
}
