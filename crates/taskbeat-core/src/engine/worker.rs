//! The worker: strictly sequential consumer of the job queue.
//!
//! Runs on its own OS thread with concurrency 1 and prefetch 1 — one
//! job popped and fully executed at a time, which serializes execution
//! across *all* queue-backed tasks (the runner is a shared,
//! rate-limited external resource). Each live job is driven on a fresh
//! single-shot current-thread runtime: the explicit bridge between the
//! synchronous queue-consumption loop and the async runner.

use chrono::Utc;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::guard::GuardRegistry;
use crate::engine::{FireOutcome, fire_once};
use crate::models::{Job, JobRecord};
use crate::runner::TaskRunner;
use crate::storage::{JobQueue, ResultStore};

/// Idle sleep between empty polls of the queue.
const IDLE_SLEEP: Duration = Duration::from_millis(50);

pub(crate) struct Worker {
    queue: JobQueue,
    results: ResultStore,
    guards: Arc<GuardRegistry>,
    runner: Arc<dyn TaskRunner>,
}

impl Worker {
    pub(crate) fn new(
        queue: JobQueue,
        results: ResultStore,
        guards: Arc<GuardRegistry>,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            queue,
            results,
            guards,
            runner,
        }
    }

    pub(crate) fn run(self, shutdown_rx: Receiver<()>) {
        info!("Worker started in sequential mode");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match self.queue.pop() {
                Ok(Some(job)) => self.handle(job),
                Ok(None) => match shutdown_rx.recv_timeout(IDLE_SLEEP) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                },
                Err(e) => {
                    error!(error = %e, "Failed to pop job from broker");
                    match shutdown_rx.recv_timeout(IDLE_SLEEP) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }
                }
            }
        }

        info!("Worker stopped");
    }

    fn handle(&self, job: Job) {
        if job.is_expired(Utc::now()) {
            warn!(
                task_id = %job.task_id,
                expires_at_ms = job.expires_at_ms,
                "Dropping expired job"
            );
            return;
        }

        // Fresh single-shot event loop per job
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!(task_id = %job.task_id, error = %e, "Failed to build job runtime");
                return;
            }
        };

        let guard = self.guards.guard_for(&job.task_id);
        let outcome = rt.block_on(fire_once(
            &job.task_id,
            &job.query,
            job.delay_variation,
            guard,
            self.runner.clone(),
        ));
        drop(rt);

        match outcome {
            FireOutcome::Skipped => {}
            FireOutcome::Ran(Ok(output)) => {
                info!(task_id = %job.task_id, attempt = job.attempt, "Task completed");
                self.record(JobRecord::success(&job, output));
            }
            FireOutcome::Ran(Err(e)) => {
                if job.attempt < job.max_retries {
                    warn!(
                        task_id = %job.task_id,
                        attempt = job.attempt,
                        max_retries = job.max_retries,
                        error = %e,
                        "Task failed, re-enqueueing for retry"
                    );
                    let mut retry = job.clone();
                    retry.attempt += 1;
                    retry.enqueued_at_ms = Utc::now().timestamp_millis();
                    if let Err(e) = self.queue.enqueue(&retry) {
                        error!(task_id = %job.task_id, error = %e, "Failed to enqueue retry");
                    }
                } else {
                    // Default policy: no automatic retry; the beat
                    // enqueues a fresh job at the next interval anyway.
                    error!(task_id = %job.task_id, error = %e, "Task failed");
                    self.record(JobRecord::failure(&job, e.to_string()));
                }
            }
        }
    }

    fn record(&self, record: JobRecord) {
        if let Err(e) = self.results.record(&record) {
            error!(task_id = %record.task_id, error = %e, "Failed to record job result");
        }
    }
}
