//! Queue-backend messages: the enqueued `Job` and its recorded outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::TaskSpec;

/// One enqueued firing of a queue-backed task.
///
/// Jobs are transient broker-owned messages: created by the beat,
/// consumed once by the worker, dropped on expiry or purge. The expiry
/// is the moment the *next* firing becomes due minus one second, so a
/// job that could not be consumed in time is dropped instead of
/// running late and out of order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub task_id: String,
    pub query: String,
    pub delay_variation: u64,
    pub max_retries: u32,
    /// 0 for the initial delivery, incremented on each retry enqueue.
    pub attempt: u32,
    pub enqueued_at_ms: i64,
    pub expires_at_ms: i64,
}

impl Job {
    pub fn for_spec(spec: &TaskSpec, enqueued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            task_id: spec.id.clone(),
            query: spec.query.clone(),
            delay_variation: spec.delay_variation,
            max_retries: spec.max_retries,
            attempt: 0,
            enqueued_at_ms: enqueued_at.timestamp_millis(),
            expires_at_ms: expires_at.timestamp_millis(),
        }
    }

    /// Expiry is compared at whole-second granularity, the unit of the
    /// schedule schema. A job enqueued at its fire time with
    /// `expires = fire + interval - 1` therefore stays consumable for
    /// the remainder of its expiry second.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        // Ceiling division; `i64::div_ceil` is still unstable (int_roundings).
        let expires_s = self.expires_at_ms.div_euclid(1000)
            + i64::from(self.expires_at_ms.rem_euclid(1000) != 0);
        now.timestamp() > expires_s
    }

    /// The composite queue key: zero-padded enqueue time for FIFO
    /// ordering, task id and attempt for uniqueness.
    pub fn queue_key(&self) -> String {
        format!("{:020}:{}:{}", self.enqueued_at_ms, self.task_id, self.attempt)
    }
}

/// Outcome of one executed job, persisted in the result backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub attempt: u32,
    pub finished_at_ms: i64,
}

impl JobRecord {
    pub fn success(job: &Job, output: String) -> Self {
        Self {
            task_id: job.task_id.clone(),
            success: true,
            output: Some(output),
            error: None,
            attempt: job.attempt,
            finished_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn failure(job: &Job, error: String) -> Self {
        Self {
            task_id: job.task_id.clone(),
            success: false,
            output: None,
            error: Some(error),
            attempt: job.attempt,
            finished_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Backend, Trigger};
    use chrono::TimeZone;

    fn spec() -> TaskSpec {
        TaskSpec {
            id: "tweet".to_string(),
            trigger: Trigger::Interval { seconds: 60 },
            query: "post an update".to_string(),
            delay_variation: 5,
            max_retries: 0,
            backend: Backend::Queue {
                broker_url: "redb:///tmp/broker.redb".to_string(),
                result_backend: "redb:///tmp/results.redb".to_string(),
            },
        }
    }

    #[test]
    fn test_job_expiry() {
        let enqueued = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let expires = enqueued + chrono::Duration::seconds(59);
        let job = Job::for_spec(&spec(), enqueued, expires);

        assert!(!job.is_expired(enqueued + chrono::Duration::seconds(59)));
        assert!(job.is_expired(enqueued + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_queue_keys_order_fifo() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(1);
        let later = t0 + chrono::Duration::minutes(5);

        let a = Job::for_spec(&spec(), t0, later);
        let b = Job::for_spec(&spec(), t1, later);
        assert!(a.queue_key() < b.queue_key());
    }
}
