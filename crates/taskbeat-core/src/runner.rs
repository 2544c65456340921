//! The runner contract: the opaque agent invocation both engines drive.

use async_trait::async_trait;

/// Executes one task firing.
///
/// Implementations must be safe to invoke repeatedly and concurrently
/// across different task ids; the schedulers guarantee same-task calls
/// never overlap. Errors are handled by the scheduler (logged, and for
/// the queue backend retried per policy) and never propagate further.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, query: &str) -> anyhow::Result<String>;
}
