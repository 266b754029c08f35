pub mod assignment;
pub mod block_status;
pub mod schedule;
pub mod template;

pub use assignment::{
    Assignment, CompletionStatus, NewAssignment, NewAssignmentRequest, RecordState,
    UpdateAssignmentRequest,
};
pub use block_status::{BlockCategory, BlockStatus, DailyScheduleStatus};
pub use schedule::{ComposedBlock, ComposedSchedule};
pub use template::{BlockType, NewTemplateBlockRequest, ScheduleTemplateBlock, weekday_index};
