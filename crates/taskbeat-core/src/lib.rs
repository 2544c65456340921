//! taskbeat-core: dual-backend task scheduling for agent workloads.
//!
//! Named tasks (a prompt handed to an opaque async [`TaskRunner`])
//! fire on interval or cron triggers, either cooperatively inside the
//! host tokio runtime or through a broker-backed queue with a beat
//! thread and a strictly sequential worker. Both backends enforce
//! at-most-one in-flight execution per task and support jittered
//! delays. [`SchedulerManager`] is the entire public surface the host
//! agent drives: `init`, `start`, `stop(timeout)`.

pub mod config;
pub mod engine;
pub mod models;
pub mod runner;
pub mod storage;

pub use config::{AppConfig, RunnerConfig};
pub use engine::{InitReport, ManagerState, SchedulerManager};
pub use models::{Backend, RawTaskConfig, TaskConfigError, TaskSpec, Trigger};
pub use runner::TaskRunner;
