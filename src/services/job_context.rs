//! Invocation context handed to job and agent handlers.
//!
//! Carries the cancellation signal, the per-job deadline, and an
//! append-only log sink the executor drains into the mission audit.
//! Handlers never retry on their own; they succeed, return a retryable
//! error, or signal permanent failure.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

/// One appended log line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub line: String,
}

/// Write-only append sink; the executor drains it after the handler
/// settles. No reentrancy: appends never call back into the handler.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    inner: Arc<Mutex<Vec<LogEntry>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, line: impl Into<String>) {
        let entry = LogEntry {
            at: Utc::now(),
            line: line.into(),
        };
        if let Ok(mut lines) = self.inner.lock() {
            lines.push(entry);
        }
    }

    /// Take everything appended so far.
    pub fn drain(&self) -> Vec<LogEntry> {
        match self.inner.lock() {
            Ok(mut lines) => std::mem::take(&mut *lines),
            Err(_) => Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map(|l| l.is_empty()).unwrap_or(true)
    }
}

/// Context for one handler invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub user_id: String,
    pub mission_id: Option<Uuid>,
    /// Wall-clock budget for this invocation.
    pub timeout_ms: u64,
    sink: LogSink,
    cancel_rx: watch::Receiver<bool>,
}

impl JobContext {
    /// Build a context plus the sender that cancels it.
    pub fn new(
        job_id: Uuid,
        user_id: impl Into<String>,
        mission_id: Option<Uuid>,
        timeout_ms: u64,
    ) -> (Self, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        (
            Self {
                job_id,
                user_id: user_id.into(),
                mission_id,
                timeout_ms,
                sink: LogSink::new(),
                cancel_rx,
            },
            cancel_tx,
        )
    }

    /// Context for direct (non-queued) invocations, e.g. tests.
    pub fn detached(user_id: impl Into<String>, timeout_ms: u64) -> (Self, watch::Sender<bool>) {
        Self::new(Uuid::new_v4(), user_id, None, timeout_ms)
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve when cancellation is requested. Handlers racing long I/O
    /// select against this to abort on deadline or shutdown.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // Outliving the sender means cancellation can no longer arrive.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Append a line to the streaming log.
    pub fn log(&self, line: impl Into<String>) {
        self.sink.append(line);
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }
}

/// A registered handler for one (queue, job-type) pair.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Synchronous payload check run at enqueue time; mismatched payloads
    /// are rejected before they hit the queue.
    fn validate_payload(&self, payload: &serde_json::Value) -> CoreResult<()>;

    async fn handle(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> CoreResult<serde_json::Value>;
}

/// Adapter giving a plain async function a typed payload schema.
pub struct TypedHandler<P, F> {
    f: F,
    _payload: PhantomData<fn(P)>,
}

impl<P, F> TypedHandler<P, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P, F, Fut> JobHandler for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = CoreResult<serde_json::Value>> + Send,
{
    fn validate_payload(&self, payload: &serde_json::Value) -> CoreResult<()> {
        serde_json::from_value::<P>(payload.clone())
            .map(|_| ())
            .map_err(|e| CoreError::Validation(format!("payload does not match schema: {e}")))
    }

    async fn handle(
        &self,
        payload: serde_json::Value,
        ctx: JobContext,
    ) -> CoreResult<serde_json::Value> {
        let typed: P = serde_json::from_value(payload)
            .map_err(|e| CoreError::Validation(format!("payload does not match schema: {e}")))?;
        (self.f)(typed, ctx).await
    }
}
