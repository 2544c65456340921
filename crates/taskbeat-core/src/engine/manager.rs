//! Top-level facade: routes specs to the right engine and coordinates
//! startup and shutdown across both.

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::engine::guard::GuardRegistry;
use crate::engine::local::LocalScheduler;
use crate::engine::queue::QueueScheduler;
use crate::models::{Backend, TaskConfigError, TaskSpec};
use crate::runner::TaskRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initialized,
    Running,
    ShuttingDown,
    Stopped,
}

/// Per-task outcome of `init`: what got scheduled and what was
/// rejected (with the reason). Configuration errors never abort
/// scheduling of the other, valid tasks.
#[derive(Debug, Default)]
pub struct InitReport {
    pub scheduled: usize,
    pub rejected: Vec<(String, String)>,
}

impl InitReport {
    fn reject(&mut self, id: &str, reason: impl ToString) {
        self.rejected.push((id.to_string(), reason.to_string()));
    }
}

/// Owns zero-or-one local scheduler and zero-or-one queue scheduler.
///
/// A plain owned value handed to the host agent; no package-level
/// singletons.
pub struct SchedulerManager {
    state: ManagerState,
    guards: Arc<GuardRegistry>,
    local: Option<LocalScheduler>,
    queue: Option<QueueScheduler>,
}

impl Default for SchedulerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerManager {
    pub fn new() -> Self {
        Self {
            state: ManagerState::Uninitialized,
            guards: Arc::new(GuardRegistry::new()),
            local: None,
            queue: None,
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Partition the spec set by backend and register everything.
    ///
    /// Duplicate ids are configuration errors: *neither* conflicting
    /// spec is registered. The queue backend's broker connection is
    /// created lazily, from the first queue-backed spec; a connection
    /// failure rejects the queue-backed specs but leaves local
    /// scheduling operational.
    pub async fn init(
        &mut self,
        specs: Vec<TaskSpec>,
        runner: Arc<dyn TaskRunner>,
    ) -> Result<InitReport> {
        if self.state != ManagerState::Uninitialized {
            bail!("init called in state {:?}", self.state);
        }

        info!(tasks = specs.len(), "Initializing scheduled tasks");
        let mut report = InitReport::default();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for spec in &specs {
            *counts.entry(spec.id.as_str()).or_default() += 1;
        }

        let mut queue_unavailable = false;
        for spec in &specs {
            if counts[spec.id.as_str()] > 1 {
                let err = TaskConfigError::DuplicateId(spec.id.clone());
                error!(task_id = %spec.id, error = %err, "Refusing to schedule task");
                report.reject(&spec.id, err);
                continue;
            }

            let registered = match &spec.backend {
                Backend::Local => match self.local.as_mut() {
                    Some(local) => local.register(spec, runner.clone()).await,
                    None => {
                        let mut local = LocalScheduler::new(self.guards.clone()).await?;
                        let registered = local.register(spec, runner.clone()).await;
                        self.local = Some(local);
                        registered
                    }
                },
                Backend::Queue {
                    broker_url,
                    result_backend,
                } => {
                    if queue_unavailable {
                        report.reject(&spec.id, "broker unavailable");
                        continue;
                    }
                    // Like the original, the broker connection comes
                    // from the first queue-backed spec; later specs
                    // reuse it.
                    match self.queue.as_mut() {
                        Some(queue) => queue.register(spec, runner.clone()),
                        None => match QueueScheduler::connect(
                            broker_url,
                            result_backend,
                            self.guards.clone(),
                        ) {
                            Ok(mut queue) => {
                                let registered = queue.register(spec, runner.clone());
                                self.queue = Some(queue);
                                registered
                            }
                            Err(e) => {
                                error!(error = %e, "Broker unavailable, rejecting queue-backed tasks");
                                queue_unavailable = true;
                                report.reject(&spec.id, format!("broker unavailable: {e:#}"));
                                continue;
                            }
                        },
                    }
                }
            };

            match registered {
                Ok(()) => report.scheduled += 1,
                Err(e) => {
                    error!(task_id = %spec.id, error = %e, "Failed to register task");
                    report.reject(&spec.id, format!("{e:#}"));
                }
            }
        }

        if !report.rejected.is_empty() {
            warn!(
                scheduled = report.scheduled,
                rejected = report.rejected.len(),
                "Some tasks were not scheduled"
            );
        }

        self.state = ManagerState::Initialized;
        Ok(report)
    }

    /// Start whichever engines have registrations. Zero tasks for a
    /// backend is a no-op for that backend, not an error.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ManagerState::Initialized {
            bail!("start called in state {:?}", self.state);
        }

        if let Some(local) = &self.local {
            local.start().await?;
        }
        if let Some(queue) = &mut self.queue {
            queue.start()?;
        }

        self.state = ManagerState::Running;
        Ok(())
    }

    /// Shut down both engines.
    ///
    /// Local shutdown waits (unbounded) for in-flight runs; the queue
    /// backend's thread joins are bounded by `timeout`, after which
    /// unjoined threads are abandoned. Always reaches `Stopped`.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        match self.state {
            ManagerState::Running | ManagerState::Initialized => {}
            other => bail!("stop called in state {other:?}"),
        }
        self.state = ManagerState::ShuttingDown;

        if let Some(mut local) = self.local.take() {
            if let Err(e) = local.shutdown().await {
                warn!(error = %e, "Local scheduler shutdown reported an error");
            }
        }

        if let Some(mut queue) = self.queue.take() {
            queue.stop(timeout).await;
        }

        self.state = ManagerState::Stopped;
        info!("Scheduler manager stopped");
        Ok(())
    }

    /// Result store of the queue backend, when one was constructed.
    pub fn queue_results(&self) -> Option<crate::storage::ResultStore> {
        self.queue.as_ref().map(|q| q.results())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trigger;
    use async_trait::async_trait;

    struct NoopRunner;

    #[async_trait]
    impl TaskRunner for NoopRunner {
        async fn run(&self, _query: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    fn local_spec(id: &str) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            trigger: Trigger::Interval { seconds: 3600 },
            query: "q".to_string(),
            delay_variation: 0,
            max_retries: 0,
            backend: Backend::Local,
        }
    }

    #[tokio::test]
    async fn test_duplicate_id_registers_neither() {
        let mut manager = SchedulerManager::new();
        let report = manager
            .init(
                vec![local_spec("dup"), local_spec("dup"), local_spec("ok")],
                Arc::new(NoopRunner),
            )
            .await
            .unwrap();

        assert_eq!(report.scheduled, 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected.iter().all(|(id, _)| id == "dup"));
    }

    #[tokio::test]
    async fn test_multiple_local_tasks_share_one_scheduler() {
        let mut manager = SchedulerManager::new();
        let report = manager
            .init(vec![local_spec("a"), local_spec("b")], Arc::new(NoopRunner))
            .await
            .unwrap();

        assert_eq!(report.scheduled, 2);
        assert!(report.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_state_machine_transitions() {
        let mut manager = SchedulerManager::new();
        assert_eq!(manager.state(), ManagerState::Uninitialized);

        assert!(manager.start().await.is_err());

        manager
            .init(vec![local_spec("a")], Arc::new(NoopRunner))
            .await
            .unwrap();
        assert_eq!(manager.state(), ManagerState::Initialized);

        // init twice is an error
        assert!(
            manager
                .init(vec![local_spec("b")], Arc::new(NoopRunner))
                .await
                .is_err()
        );

        manager.start().await.unwrap();
        assert_eq!(manager.state(), ManagerState::Running);

        manager.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);

        assert!(manager.stop(Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_tasks_start_is_noop() {
        let mut manager = SchedulerManager::new();
        manager.init(Vec::new(), Arc::new(NoopRunner)).await.unwrap();
        manager.start().await.unwrap();
        manager.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.state(), ManagerState::Stopped);
    }

    #[tokio::test]
    async fn test_broker_failure_keeps_local_tasks() {
        let queue_spec = TaskSpec {
            id: "q".to_string(),
            trigger: Trigger::Interval { seconds: 60 },
            query: "query".to_string(),
            delay_variation: 0,
            max_retries: 0,
            backend: Backend::Queue {
                broker_url: "redb:///proc/taskbeat-no-such-place/broker.redb".to_string(),
                result_backend: "redb:///proc/taskbeat-no-such-place/results.redb".to_string(),
            },
        };

        let mut manager = SchedulerManager::new();
        let report = manager
            .init(vec![local_spec("l"), queue_spec], Arc::new(NoopRunner))
            .await
            .unwrap();

        assert_eq!(report.scheduled, 1);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, "q");

        manager.start().await.unwrap();
        manager.stop(Duration::from_secs(1)).await.unwrap();
    }
}
