use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(rename_all = "kebab-case")]
pub enum BlockType {
    Bible,
    Assignment,
    Travel,
    CoOp,
    StudyHall,
    #[serde(rename = "prep/load")]
    #[sqlx(rename = "prep/load")]
    PrepLoad,
    Movement,
    Lunch,
}

impl BlockType {
    /// Blocks the composer fills with pending work.
    pub fn accepts_assignment(self) -> bool {
        matches!(self, BlockType::Assignment | BlockType::StudyHall)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ScheduleTemplateBlock {
    pub id: i64,
    pub student_id: String,
    /// 0 = Monday .. 6 = Sunday
    pub weekday: i64,
    pub block_number: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub block_type: BlockType,
    pub subject: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplateBlockRequest {
    pub weekday: i64,
    pub block_number: i64,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub block_type: BlockType,
    #[serde(default)]
    pub subject: Option<String>,
}

pub fn weekday_index(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_monday())
}
