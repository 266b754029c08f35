//! Fills a day's template blocks with pending assignments.
//!
//! `compose` is pure: it reads its inputs, never mutates them and never
//! touches the store. `compose_schedule` is the store-backed wrapper the API
//! calls.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::config::NearDuplicateRule;
use crate::db::repository;
use crate::error::AppError;
use crate::models::{
    Assignment, ComposedBlock, ComposedSchedule, ScheduleTemplateBlock, weekday_index,
};

pub fn compose(
    blocks: &[ScheduleTemplateBlock],
    pending: &[Assignment],
    now: DateTime<Utc>,
    rule: &NearDuplicateRule,
) -> ComposedSchedule {
    let mut remaining: Vec<&Assignment> = pending.iter().collect();
    // Stable sort: equal keys keep input order.
    remaining.sort_by(|a, b| urgency_key(a, now).cmp(&urgency_key(b, now)));

    let mut ordered_blocks: Vec<&ScheduleTemplateBlock> = blocks.iter().collect();
    ordered_blocks.sort_by(|a, b| match a.start_time.cmp(&b.start_time) {
        Ordering::Equal => a.block_number.cmp(&b.block_number),
        other => other,
    });

    let mut used_subjects: HashSet<String> = HashSet::new();
    let mut placed_titles: Vec<HashSet<String>> = Vec::new();
    let mut composed = Vec::with_capacity(ordered_blocks.len());

    for block in ordered_blocks {
        if !block.block_type.accepts_assignment() {
            composed.push(ComposedBlock {
                block: block.clone(),
                assignment: None,
            });
            continue;
        }

        let pick = remaining
            .iter()
            .position(|a| !used_subjects.contains(&subject_key(&a.subject)))
            .or_else(|| {
                remaining.iter().position(|a| {
                    let words = title_words(&a.title, rule.min_word_chars);
                    !placed_titles
                        .iter()
                        .any(|placed| is_near_duplicate(&words, placed, rule))
                })
            })
            .or(if remaining.is_empty() { None } else { Some(0) });

        let assignment = pick.map(|index| {
            let chosen = remaining.remove(index);
            used_subjects.insert(subject_key(&chosen.subject));
            placed_titles.push(title_words(&chosen.title, rule.min_word_chars));
            chosen.clone()
        });

        composed.push(ComposedBlock {
            block: block.clone(),
            assignment,
        });
    }

    ComposedSchedule {
        blocks: composed,
        unscheduled: remaining.into_iter().cloned().collect(),
    }
}

pub async fn compose_schedule(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    rule: &NearDuplicateRule,
) -> Result<ComposedSchedule, AppError> {
    let weekday = weekday_index(date.weekday());
    let blocks = repository::fetch_blocks_for_weekday(db, student_id, weekday).await?;
    let pending = repository::fetch_pending_for_date(db, student_id, date).await?;

    if blocks.is_empty() {
        debug!("no template blocks for {} on {}", student_id, date);
    }

    let schedule = compose(&blocks, &pending, Utc::now(), rule);
    debug!(
        "composed {} blocks for {} on {} ({} unscheduled)",
        schedule.blocks.len(),
        student_id,
        date,
        schedule.unscheduled.len()
    );
    Ok(schedule)
}

/// Overdue first, then upcoming by due time, undated last.
fn urgency_key(assignment: &Assignment, now: DateTime<Utc>) -> (u8, Option<DateTime<Utc>>) {
    match assignment.due_at {
        Some(due) if due < now => (0, Some(due)),
        Some(due) => (1, Some(due)),
        None => (2, None),
    }
}

fn subject_key(subject: &str) -> String {
    subject.trim().to_lowercase()
}

fn title_words(title: &str, min_word_chars: usize) -> HashSet<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && word.chars().count() >= min_word_chars)
        .map(str::to_lowercase)
        .collect()
}

fn is_near_duplicate(
    words: &HashSet<String>,
    placed: &HashSet<String>,
    rule: &NearDuplicateRule,
) -> bool {
    words.intersection(placed).count() >= rule.min_shared_words
}
