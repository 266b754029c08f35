pub mod block_status;
pub mod composer;
pub mod reconciler;
pub mod scheduler;

pub use block_status::{BlockStatusChange, InvalidStatusTransition};
pub use composer::{compose, compose_schedule};
pub use reconciler::{ReconcileReport, Reconciler, StudentSyncOutcome};
pub use scheduler::SyncScheduler;
