//! Shared helpers for integration tests.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gpilot::services::{Config, Runtime};

/// Runtime against an in-memory database with test-friendly cadence.
pub async fn test_runtime() -> Arc<Runtime> {
    let config = Config {
        db_url: "sqlite::memory:".into(),
        queue_poll_interval_ms: 20,
        queue_default_concurrency: 2,
        job_default_timeout_ms: 10_000,
        shutdown_grace_ms: 2_000,
        ..Default::default()
    };
    Runtime::new(config).await.expect("runtime should assemble")
}

/// Poll until `check` yields `Some`, or panic after `timeout`.
pub async fn wait_until<T, F, Fut>(timeout: Duration, what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
}
