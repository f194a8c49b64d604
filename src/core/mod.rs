pub mod command;
pub mod executor;
pub mod models;
pub mod mount_guard;
pub mod planner;
pub mod restic;
pub mod retention;
pub mod snapshot;

pub use command::{CommandOutput, CommandRunner};
pub use executor::BackupExecutor;
pub use models::{DataSource, JobCategory, JobDescriptor, JobId, JobSummary, Repository};
pub use mount_guard::{MountEntry, MountGuard, MountTable};
pub use planner::JobPlanner;
pub use restic::Restic;
pub use retention::{RetentionReport, RetentionRunner};
pub use snapshot::{SnapshotController, SnapshotHandle, SnapshotState};
