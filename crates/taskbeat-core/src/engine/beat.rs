//! The beat: computes due times for queue-backed tasks and enqueues
//! jobs into the broker.
//!
//! Runs on its own OS thread. The schedule list is frozen before the
//! thread starts and never mutated concurrently with dispatch. Sleeps
//! ride on `Receiver::recv_timeout` so the shutdown signal interrupts
//! them immediately.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::models::{Job, TaskSpec};
use crate::storage::JobQueue;

/// Upper bound on one beat sleep; keeps the loop responsive if the
/// clock jumps backwards.
const MAX_SLEEP: Duration = Duration::from_secs(1);

struct Entry {
    spec: TaskSpec,
    next_fire: DateTime<Utc>,
}

pub(crate) fn run(specs: Vec<TaskSpec>, queue: JobQueue, shutdown_rx: Receiver<()>) {
    let now = Utc::now();
    let mut entries: Vec<Entry> = specs
        .into_iter()
        .filter_map(|spec| match spec.trigger.next_fire_after(now) {
            Some(next_fire) => Some(Entry { spec, next_fire }),
            None => {
                warn!(task_id = %spec.id, "Trigger has no upcoming fire time, not scheduling");
                None
            }
        })
        .collect();

    info!(tasks = entries.len(), "Beat started");

    loop {
        let now = Utc::now();
        let sleep = entries
            .iter()
            .map(|e| e.next_fire)
            .min()
            .map(|earliest| (earliest - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP);

        match shutdown_rx.recv_timeout(sleep) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Utc::now();
        let mut exhausted = Vec::new();
        for (index, entry) in entries.iter_mut().enumerate() {
            if entry.next_fire > now {
                continue;
            }

            let Some(following) = entry.spec.trigger.next_fire_after(entry.next_fire) else {
                exhausted.push(index);
                continue;
            };

            // A job that cannot be consumed before the next firing is
            // due gets dropped by the worker instead of running late.
            let expires_at = following - ChronoDuration::seconds(1);
            let job = Job::for_spec(&entry.spec, now, expires_at);

            match queue.enqueue(&job) {
                Ok(()) => debug!(
                    task_id = %entry.spec.id,
                    expires_at = %expires_at,
                    "Enqueued job"
                ),
                Err(e) => error!(task_id = %entry.spec.id, error = %e, "Failed to enqueue job"),
            }

            entry.next_fire = following;
        }

        for index in exhausted.into_iter().rev() {
            let entry = entries.remove(index);
            warn!(task_id = %entry.spec.id, "Trigger exhausted, removing from beat schedule");
        }
    }

    info!("Beat stopped");
}
