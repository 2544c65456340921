//! Broker-backed scheduler: owns the beat and worker threads.

use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::engine::guard::GuardRegistry;
use crate::engine::{beat, worker::Worker};
use crate::models::TaskSpec;
use crate::runner::TaskRunner;
use crate::storage::{JobQueue, ResultStore, open_database, same_database};

struct EngineThread {
    name: &'static str,
    shutdown_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Distributed scheduler for queue-backed tasks.
///
/// The broker connection and its queue are owned exclusively here; the
/// registration list is frozen at `start` and never mutated
/// concurrently with dispatch.
pub struct QueueScheduler {
    queue: JobQueue,
    results: ResultStore,
    guards: Arc<GuardRegistry>,
    specs: Vec<TaskSpec>,
    runner: Option<Arc<dyn TaskRunner>>,
    beat: Option<EngineThread>,
    worker: Option<EngineThread>,
}

impl QueueScheduler {
    /// Connect to the broker and result backend.
    ///
    /// Failure here is fatal to the queue backend only; local-backend
    /// tasks keep operating.
    pub fn connect(
        broker_url: &str,
        result_backend_url: &str,
        guards: Arc<GuardRegistry>,
    ) -> Result<Self> {
        let broker_db = open_database(broker_url).context("broker connection failed")?;
        // redb holds one exclusive lock per file, so a shared file
        // means a shared handle.
        let result_db = if same_database(broker_url, result_backend_url) {
            broker_db.clone()
        } else {
            open_database(result_backend_url).context("result backend connection failed")?
        };

        let queue = JobQueue::new(broker_db)?;
        let results = ResultStore::new(result_db)?;

        info!(broker_url = %broker_url, "Queue scheduler connected to broker");

        Ok(Self {
            queue,
            results,
            guards,
            specs: Vec::new(),
            runner: None,
            beat: None,
            worker: None,
        })
    }

    /// Register a queue-backed spec. Only valid before `start`.
    pub fn register(&mut self, spec: &TaskSpec, runner: Arc<dyn TaskRunner>) -> Result<()> {
        if self.beat.is_some() || self.worker.is_some() {
            bail!("cannot register task '{}' after the queue scheduler started", spec.id);
        }

        self.guards.guard_for(&spec.id);
        self.runner.get_or_insert(runner);
        self.specs.push(spec.clone());

        info!(
            task_id = %spec.id,
            delay_variation = spec.delay_variation,
            max_retries = spec.max_retries,
            "Scheduled queue task"
        );
        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.specs.len()
    }

    /// Result store handle, for inspection of recorded job outcomes.
    pub fn results(&self) -> ResultStore {
        self.results.clone()
    }

    /// Spawn the beat and worker threads.
    ///
    /// Both are background units: the caller's control flow continues,
    /// nothing blocks waiting on them.
    pub fn start(&mut self) -> Result<()> {
        if self.specs.is_empty() {
            return Ok(());
        }
        let runner = self
            .runner
            .clone()
            .context("queue scheduler started without a runner")?;

        let (beat_tx, beat_rx) = mpsc::channel();
        let beat_specs = self.specs.clone();
        let beat_queue = self.queue.clone();
        let beat_handle = std::thread::Builder::new()
            .name("taskbeat-beat".to_string())
            .spawn(move || beat::run(beat_specs, beat_queue, beat_rx))
            .context("failed to spawn beat thread")?;
        self.beat = Some(EngineThread {
            name: "taskbeat-beat",
            shutdown_tx: beat_tx,
            handle: beat_handle,
        });

        let (worker_tx, worker_rx) = mpsc::channel();
        let worker = Worker::new(
            self.queue.clone(),
            self.results.clone(),
            self.guards.clone(),
            runner,
        );
        let worker_handle = std::thread::Builder::new()
            .name("taskbeat-worker".to_string())
            .spawn(move || worker.run(worker_rx))
            .context("failed to spawn worker thread")?;
        self.worker = Some(EngineThread {
            name: "taskbeat-worker",
            shutdown_tx: worker_tx,
            handle: worker_handle,
        });

        info!(tasks = self.specs.len(), "Beat and worker threads started in sequential mode");
        Ok(())
    }

    /// Signal shutdown, join both threads bounded by `timeout`, then
    /// purge still-queued jobs so a restart does not replay stale work.
    ///
    /// A thread that misses the deadline is logged and abandoned; its
    /// handle is dropped so process exit reclaims it.
    pub async fn stop(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        // Signal both threads first so each has the whole window to
        // react, then join them against the shared deadline.
        let engines: Vec<EngineThread> = [self.beat.take(), self.worker.take()]
            .into_iter()
            .flatten()
            .collect();
        for engine in &engines {
            let _ = engine.shutdown_tx.send(());
        }
        for engine in engines {
            Self::join_until(engine.name, engine.handle, deadline).await;
        }

        match self.queue.purge() {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged still-queued jobs"),
            Err(e) => warn!(error = %e, "Failed to purge job queue"),
        }
    }

    async fn join_until(name: &str, handle: JoinHandle<()>, deadline: Instant) {
        loop {
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(thread = name, "Thread panicked before shutdown");
                }
                return;
            }
            if Instant::now() >= deadline {
                warn!(thread = name, "Thread did not stop within timeout, abandoning it");
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
