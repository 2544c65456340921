//! Cooperative scheduler for local-backend tasks.
//!
//! Runs inside the host tokio runtime. Each firing is spawned onto a
//! task tracker so jitter and the runner never block other scheduled
//! tasks, and shutdown can wait for in-flight runs.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use crate::engine::guard::GuardRegistry;
use crate::engine::{FireOutcome, fire_once};
use crate::models::{TaskSpec, Trigger};
use crate::runner::TaskRunner;

pub struct LocalScheduler {
    scheduler: JobScheduler,
    tracker: TaskTracker,
    guards: Arc<GuardRegistry>,
    job_count: usize,
}

impl LocalScheduler {
    pub async fn new(guards: Arc<GuardRegistry>) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("Failed to create JobScheduler: {}", e))?;

        Ok(Self {
            scheduler,
            tracker: TaskTracker::new(),
            guards,
            job_count: 0,
        })
    }

    /// Register a local-backend spec.
    ///
    /// The job closure captures id, query and delay variation by value
    /// per registration; nothing is shared mutably between closures.
    pub async fn register(&mut self, spec: &TaskSpec, runner: Arc<dyn TaskRunner>) -> Result<()> {
        let guard = self.guards.guard_for(&spec.id);
        let tracker = self.tracker.clone();
        let id = spec.id.clone();
        let query = spec.query.clone();
        let delay_variation = spec.delay_variation;

        let callback =
            move |_uuid, _lock| -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
                let id = id.clone();
                let query = query.clone();
                let guard = guard.clone();
                let runner = runner.clone();
                let tracker = tracker.clone();

                Box::pin(async move {
                    tracker.spawn(async move {
                        match fire_once(&id, &query, delay_variation, guard, runner).await {
                            FireOutcome::Ran(Ok(_)) => {
                                info!(task_id = %id, "Task completed");
                            }
                            FireOutcome::Ran(Err(e)) => {
                                error!(task_id = %id, error = %e, "Task failed");
                            }
                            FireOutcome::Skipped => {}
                        }
                    });
                })
            };

        let job = match &spec.trigger {
            Trigger::Interval { seconds } => {
                Job::new_repeated_async(Duration::from_secs(*seconds), callback)
                    .map_err(|e| anyhow!("Failed to create interval job: {}", e))?
            }
            Trigger::Cron { expr } => Job::new_async(expr.as_str(), callback)
                .map_err(|e| anyhow!("Failed to create cron job: {}", e))?,
        };

        self.scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("Failed to add job to scheduler: {}", e))?;
        self.job_count += 1;

        match &spec.trigger {
            Trigger::Interval { seconds } => info!(
                task_id = %spec.id,
                interval_secs = seconds,
                delay_variation = spec.delay_variation,
                "Scheduled local interval task"
            ),
            Trigger::Cron { expr } => info!(
                task_id = %spec.id,
                cron = %expr,
                "Scheduled local cron task"
            ),
        }

        Ok(())
    }

    /// Begin dispatching the already-registered jobs.
    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| anyhow!("Failed to start scheduler: {}", e))?;
        info!(jobs = self.job_count, "Local scheduler started");
        Ok(())
    }

    /// Cancel pending timers and wait for in-flight runs.
    ///
    /// The wait is cooperative and unbounded; a runner mid-await is
    /// allowed to finish, never forcibly cancelled.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("Failed to shutdown scheduler: {}", e))?;

        self.tracker.close();
        self.tracker.wait().await;

        info!("Local scheduler stopped");
        Ok(())
    }

    pub fn job_count(&self) -> usize {
        self.job_count
    }
}
