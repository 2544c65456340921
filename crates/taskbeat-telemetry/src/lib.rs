//! Tracing setup shared by the taskbeat binaries.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies.
/// Safe to call more than once (later calls are no-ops), which keeps
/// test binaries that initialise logging in several places working.
pub fn init(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .try_init();
}
