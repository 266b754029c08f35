use serde::{Deserialize, Serialize};

use crate::models::{Assignment, ScheduleTemplateBlock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedBlock {
    pub block: ScheduleTemplateBlock,
    /// Always `None` for blocks that do not take work, and for work blocks
    /// left open because nothing remained to place.
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedSchedule {
    pub blocks: Vec<ComposedBlock>,
    pub unscheduled: Vec<Assignment>,
}

impl ComposedSchedule {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
