use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::BlockType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum BlockStatus {
    NotStarted,
    InProgress,
    Complete,
    Stuck,
    Overtime,
}

impl BlockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockStatus::NotStarted => "not-started",
            BlockStatus::InProgress => "in-progress",
            BlockStatus::Complete => "complete",
            BlockStatus::Stuck => "stuck",
            BlockStatus::Overtime => "overtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCategory {
    /// Done or not done.
    Binary,
    FullRange,
}

const BLOCK_CATEGORIES: &[(BlockType, BlockCategory)] = &[
    (BlockType::Bible, BlockCategory::FullRange),
    (BlockType::Assignment, BlockCategory::FullRange),
    (BlockType::Travel, BlockCategory::Binary),
    (BlockType::CoOp, BlockCategory::FullRange),
    (BlockType::StudyHall, BlockCategory::FullRange),
    (BlockType::PrepLoad, BlockCategory::Binary),
    (BlockType::Movement, BlockCategory::Binary),
    (BlockType::Lunch, BlockCategory::Binary),
];

const LEGAL_STATES: &[(BlockCategory, &[BlockStatus])] = &[
    (
        BlockCategory::Binary,
        &[BlockStatus::NotStarted, BlockStatus::Complete],
    ),
    (
        BlockCategory::FullRange,
        &[
            BlockStatus::NotStarted,
            BlockStatus::InProgress,
            BlockStatus::Complete,
            BlockStatus::Stuck,
            BlockStatus::Overtime,
        ],
    ),
];

impl BlockCategory {
    pub fn of(block_type: BlockType) -> Self {
        BLOCK_CATEGORIES
            .iter()
            .find(|(t, _)| *t == block_type)
            .map(|(_, c)| *c)
            .unwrap_or(BlockCategory::FullRange)
    }

    pub fn legal_states(self) -> &'static [BlockStatus] {
        LEGAL_STATES
            .iter()
            .find(|(c, _)| *c == self)
            .map(|(_, states)| *states)
            .unwrap_or(&[])
    }

    pub fn allows(self, status: BlockStatus) -> bool {
        self.legal_states().contains(&status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DailyScheduleStatus {
    pub student_id: String,
    pub schedule_date: NaiveDate,
    pub block_id: i64,
    pub status: BlockStatus,
    pub updated_at: DateTime<Utc>,
}
