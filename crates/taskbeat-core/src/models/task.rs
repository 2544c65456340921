//! Task definitions: triggers, backends and the validated `TaskSpec`.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Errors produced while turning a raw config entry into a `TaskSpec`.
///
/// These are reported per task at startup; an invalid entry is logged
/// and skipped without aborting scheduling of the remaining tasks.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaskConfigError {
    #[error("task id must not be empty")]
    EmptyId,
    #[error("query must not be empty")]
    EmptyQuery,
    #[error("interval must be at least 1 second, got {0}")]
    IntervalTooSmall(u64),
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("exactly one of interval or cron must be set, got both")]
    BothTriggers,
    #[error("exactly one of interval or cron must be set, got neither")]
    MissingTrigger,
    #[error("queue schedule requires a non-empty broker_url")]
    MissingBrokerUrl,
    #[error("queue schedule requires a non-empty result_backend")]
    MissingResultBackend,
    #[error("duplicate task id '{0}'")]
    DuplicateId(String),
}

/// When a task fires next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trigger {
    /// Fixed-rate firing every `seconds` seconds.
    Interval { seconds: u64 },
    /// Cron expression, stored in the normalized 6-field form
    /// (seconds prepended) that the `cron` crate consumes.
    Cron { expr: String },
}

impl Trigger {
    /// Next fire time strictly after `from`.
    ///
    /// Interval triggers always have a next fire; a cron schedule may
    /// run out (e.g. an expression pinned to a past year).
    pub fn next_fire_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval { seconds } => {
                from.checked_add_signed(Duration::seconds(*seconds as i64))
            }
            Trigger::Cron { expr } => {
                let schedule = Schedule::from_str(expr).ok()?;
                schedule.after(&from).next()
            }
        }
    }
}

/// Normalize a crontab expression to the 6-field form used internally.
///
/// Standard 5-field crontab (minute hour day month weekday) gets a `0`
/// seconds field prepended; 6/7-field expressions pass through. The
/// result is parsed once here so invalid expressions are caught at
/// validation time rather than at registration.
pub fn normalize_cron(expr: &str) -> Result<String, TaskConfigError> {
    let trimmed = expr.trim();
    let field_count = trimmed.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| TaskConfigError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })?;

    Ok(normalized)
}

/// Which engine executes the task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backend {
    /// Cooperative scheduling inside the host tokio runtime.
    Local,
    /// Broker-backed queue with a beat thread and a sequential worker.
    Queue {
        broker_url: String,
        result_backend: String,
    },
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    Local,
    Queue,
}

/// The `schedule:` section of a task config entry.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default, rename = "type")]
    pub kind: ScheduleKind,
    #[serde(default)]
    pub broker_url: Option<String>,
    #[serde(default)]
    pub result_backend: Option<String>,
}

/// One entry of the `tasks:` mapping, exactly as deserialized.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawTaskConfig {
    /// Fixed interval in seconds. Mutually exclusive with `cron`.
    #[serde(default)]
    pub interval: Option<u64>,
    /// Standard 5-field crontab expression. Mutually exclusive with `interval`.
    #[serde(default)]
    pub cron: Option<String>,
    /// Prompt handed to the runner on each firing.
    #[serde(default)]
    pub query: String,
    /// Upper bound (seconds) of the uniform random jitter before each firing.
    #[serde(default)]
    pub delay_variation: u64,
    /// Automatic retries for queue-backed tasks. 0 means failures are
    /// logged and dropped; the beat enqueues a fresh job next cycle anyway.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// A validated, immutable description of one schedulable unit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub trigger: Trigger,
    pub query: String,
    pub delay_variation: u64,
    pub max_retries: u32,
    pub backend: Backend,
}

impl TaskSpec {
    /// Validate a raw config entry. Pure; no side effects.
    pub fn validate(id: &str, raw: &RawTaskConfig) -> Result<TaskSpec, TaskConfigError> {
        if id.trim().is_empty() {
            return Err(TaskConfigError::EmptyId);
        }
        if raw.query.trim().is_empty() {
            return Err(TaskConfigError::EmptyQuery);
        }

        let trigger = match (raw.interval, raw.cron.as_deref()) {
            (Some(_), Some(_)) => return Err(TaskConfigError::BothTriggers),
            (None, None) => return Err(TaskConfigError::MissingTrigger),
            (Some(seconds), None) => {
                if seconds < 1 {
                    return Err(TaskConfigError::IntervalTooSmall(seconds));
                }
                Trigger::Interval { seconds }
            }
            (None, Some(expr)) => Trigger::Cron {
                expr: normalize_cron(expr)?,
            },
        };

        let backend = match raw.schedule.kind {
            ScheduleKind::Local => Backend::Local,
            ScheduleKind::Queue => {
                let broker_url = raw
                    .schedule
                    .broker_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(TaskConfigError::MissingBrokerUrl)?;
                let result_backend = raw
                    .schedule
                    .result_backend
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or(TaskConfigError::MissingResultBackend)?;
                Backend::Queue {
                    broker_url: broker_url.to_string(),
                    result_backend: result_backend.to_string(),
                }
            }
        };

        Ok(TaskSpec {
            id: id.to_string(),
            trigger,
            query: raw.query.clone(),
            delay_variation: raw.delay_variation,
            max_retries: raw.max_retries,
            backend,
        })
    }

    pub fn is_queue_backed(&self) -> bool {
        matches!(self.backend, Backend::Queue { .. })
    }
}
