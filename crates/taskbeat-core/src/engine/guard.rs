//! Per-task reentrancy guards backing the skip-if-running policy.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boolean compare-and-set guarding one task id.
///
/// Shared between the tokio loop and the worker thread; task id
/// uniqueness means only one engine ever references a given guard, but
/// the guard is thread-safe regardless.
#[derive(Debug)]
pub struct ExecutionGuard {
    task_id: String,
    running: AtomicBool,
}

impl ExecutionGuard {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            running: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Returns true if the guard was free and is now held.
    pub fn try_acquire(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Idempotent; safe to call even if never acquired.
    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Registry of guards, one per registered task id.
///
/// Guards are created at registration and live for the process.
#[derive(Default)]
pub struct GuardRegistry {
    guards: DashMap<String, Arc<ExecutionGuard>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard_for(&self, task_id: &str) -> Arc<ExecutionGuard> {
        self.guards
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(ExecutionGuard::new(task_id)))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let guard = ExecutionGuard::new("t");
        assert!(guard.try_acquire());
        assert!(!guard.try_acquire());
        guard.release();
        assert!(guard.try_acquire());
    }

    #[test]
    fn test_release_is_idempotent() {
        let guard = ExecutionGuard::new("t");
        guard.release();
        guard.release();
        assert!(guard.try_acquire());
    }

    #[test]
    fn test_registry_returns_same_guard_per_id() {
        let registry = GuardRegistry::new();
        let a = registry.guard_for("x");
        let b = registry.guard_for("x");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        assert!(a.try_acquire());
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let guard = Arc::new(ExecutionGuard::new("t"));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let guard = guard.clone();
            handles.push(std::thread::spawn(move || guard.try_acquire()));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
