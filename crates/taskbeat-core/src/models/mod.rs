pub mod job;
pub mod task;

pub use job::{Job, JobRecord};
pub use task::{Backend, RawTaskConfig, ScheduleConfig, ScheduleKind, TaskConfigError, TaskSpec, Trigger};
