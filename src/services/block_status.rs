use chrono::NaiveDate;
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::repository;
use crate::error::AppError;
use crate::models::{BlockCategory, BlockStatus, ScheduleTemplateBlock};

/// A refused status change. Reported back to the caller, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidStatusTransition {
    #[error("{status} is not a legal state for {category:?} blocks")]
    IllegalForCategory {
        category: BlockCategory,
        status: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockStatusChange {
    pub block_id: i64,
    pub category: BlockCategory,
    pub status: BlockStatus,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected: Option<String>,
}

/// The status the advance action moves to.
pub fn next_status(category: BlockCategory, current: BlockStatus) -> BlockStatus {
    match category {
        BlockCategory::Binary => match current {
            BlockStatus::Complete => BlockStatus::NotStarted,
            _ => BlockStatus::Complete,
        },
        BlockCategory::FullRange => match current {
            BlockStatus::NotStarted => BlockStatus::InProgress,
            BlockStatus::InProgress | BlockStatus::Stuck | BlockStatus::Overtime => {
                BlockStatus::Complete
            }
            BlockStatus::Complete => BlockStatus::NotStarted,
        },
    }
}

pub fn check_transition(
    category: BlockCategory,
    target: BlockStatus,
) -> Result<(), InvalidStatusTransition> {
    if category.allows(target) {
        Ok(())
    } else {
        Err(InvalidStatusTransition::IllegalForCategory {
            category,
            status: target.as_str(),
        })
    }
}

/// Blocks belong to one student's template; anyone else gets `NotFound`.
async fn load_block(
    db: &SqlitePool,
    student_id: &str,
    block_id: i64,
) -> Result<ScheduleTemplateBlock, AppError> {
    repository::find_template_block(db, block_id)
        .await?
        .filter(|block| block.student_id == student_id)
        .ok_or(AppError::NotFound)
}

pub async fn get_block_status(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    block_id: i64,
) -> Result<BlockStatusChange, AppError> {
    let block = load_block(db, student_id, block_id).await?;
    let stored = repository::ensure_block_status(db, student_id, date, block_id).await?;

    Ok(BlockStatusChange {
        block_id,
        category: BlockCategory::of(block.block_type),
        status: stored.status,
        changed: false,
        rejected: None,
    })
}

pub async fn advance_block_status(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    block_id: i64,
) -> Result<BlockStatusChange, AppError> {
    let block = load_block(db, student_id, block_id).await?;
    let category = BlockCategory::of(block.block_type);
    let current = repository::ensure_block_status(db, student_id, date, block_id).await?;
    let next = next_status(category, current.status);

    let changed = repository::upsert_block_status(db, student_id, date, block_id, next).await?;
    debug!(
        "advanced block {} for {} on {}: {} -> {}",
        block_id,
        student_id,
        date,
        current.status.as_str(),
        next.as_str()
    );

    Ok(BlockStatusChange {
        block_id,
        category,
        status: next,
        changed,
        rejected: None,
    })
}

/// Side channel for stuck and overtime, and for resetting a block directly.
pub async fn set_block_status(
    db: &SqlitePool,
    student_id: &str,
    date: NaiveDate,
    block_id: i64,
    target: BlockStatus,
) -> Result<BlockStatusChange, AppError> {
    let block = load_block(db, student_id, block_id).await?;
    let category = BlockCategory::of(block.block_type);

    if let Err(rejection) = check_transition(category, target) {
        warn!(
            "rejected status change for block {} ({} on {}): {}",
            block_id, student_id, date, rejection
        );
        let current = repository::ensure_block_status(db, student_id, date, block_id).await?;
        return Ok(BlockStatusChange {
            block_id,
            category,
            status: current.status,
            changed: false,
            rejected: Some(rejection.to_string()),
        });
    }

    let changed = repository::upsert_block_status(db, student_id, date, block_id, target).await?;
    Ok(BlockStatusChange {
        block_id,
        category,
        status: target,
        changed,
        rejected: None,
    })
}
