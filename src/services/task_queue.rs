//! Durable multi-queue work distributor.
//!
//! Named queues are disjoint FIFO-within-priority streams, each served by
//! its own worker pool. Retry with exponential backoff is owned here;
//! handlers only classify their failures. Exhausted or permanently failed
//! jobs land in the dead-letter queue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{
    DeadLetterEntry, EnqueueOptions, FailureReason, Job, JobStatus, QueueMetrics,
};
use crate::domain::ports::{
    DeadLetterRepository, JobEvent, JobRepository, QueueStatsSource, TelemetrySink,
};
use crate::services::job_context::{JobContext, JobHandler, TypedHandler};

/// Idempotency keys deduplicate against jobs enqueued within this window.
const IDEMPOTENCY_WINDOW_HOURS: i64 = 24;

/// How long a cancelled handler gets to unwind before its task is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Tuning knobs for the queue, fed from the runtime config.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Worker sleep between empty polls, before jitter.
    pub poll_interval_ms: u64,
    /// Workers per queue when `start_workers` is called without an
    /// explicit concurrency.
    pub default_concurrency: usize,
    /// Handler deadline when the job type declares none.
    pub default_timeout_ms: u64,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            default_concurrency: 5,
            default_timeout_ms: 5 * 60 * 1000,
            shutdown_grace_ms: 30_000,
        }
    }
}

struct HandlerEntry {
    handler: Arc<dyn JobHandler>,
    timeout_ms: Option<u64>,
}

struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// State shared between the service handle and its worker tasks.
struct Inner {
    jobs: Arc<dyn JobRepository>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    telemetry: Arc<dyn TelemetrySink>,
    config: QueueConfig,
    handlers: RwLock<HashMap<(String, String), Arc<HandlerEntry>>>,
}

/// The task queue service.
pub struct TaskQueue {
    inner: Arc<Inner>,
    pools: Mutex<HashMap<String, WorkerPool>>,
}

impl TaskQueue {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        telemetry: Arc<dyn TelemetrySink>,
        config: QueueConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs,
                dead_letters,
                telemetry,
                config,
                handlers: RwLock::new(HashMap::new()),
            }),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Register a handler with a typed payload for (queue, job-type).
    /// Registering the same pair twice is an error.
    pub fn register<P, F, Fut>(&self, queue: &str, job_type: &str, f: F) -> CoreResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = CoreResult<serde_json::Value>> + Send + 'static,
    {
        self.register_handler(queue, job_type, Arc::new(TypedHandler::new(f)), None)
    }

    /// Register a pre-built handler, optionally overriding the per-type
    /// deadline.
    pub fn register_handler(
        &self,
        queue: &str,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
        timeout_ms: Option<u64>,
    ) -> CoreResult<()> {
        let key = (queue.to_string(), job_type.to_string());
        let mut handlers = self
            .inner
            .handlers
            .write()
            .map_err(|_| CoreError::Consistency("handler registry poisoned".into()))?;
        if handlers.contains_key(&key) {
            return Err(CoreError::Validation(format!(
                "handler already registered for ({queue}, {job_type})"
            )));
        }
        handlers.insert(key, Arc::new(HandlerEntry { handler, timeout_ms }));
        Ok(())
    }

    /// Enqueue a job. Payloads are validated against the registered
    /// handler's schema synchronously; an unregistered (queue, type) is a
    /// validation error.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> CoreResult<Uuid> {
        let entry = self.inner.handler_entry(queue, job_type).ok_or_else(|| {
            CoreError::Validation(format!("no handler registered for ({queue}, {job_type})"))
        })?;
        entry.handler.validate_payload(&payload)?;

        if let Some(ref key) = options.idempotency_key {
            let since = Utc::now() - chrono::Duration::hours(IDEMPOTENCY_WINDOW_HOURS);
            if let Some(existing) = self
                .inner
                .jobs
                .find_by_idempotency_key(queue, key, since)
                .await?
            {
                tracing::debug!(
                    job_id = %existing.id,
                    queue,
                    idempotency_key = key,
                    "enqueue deduplicated against existing job"
                );
                return Ok(existing.id);
            }
        }

        let job = Job::new(queue, job_type, payload, options);
        self.inner.jobs.insert(&job).await?;
        tracing::debug!(job_id = %job.id, queue, job_type, priority = job.priority, "job enqueued");
        Ok(job.id)
    }

    /// Counts of jobs by status for one queue.
    pub async fn get_queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics> {
        self.inner.jobs.queue_metrics(queue).await
    }

    /// Queues that have at least one registered handler.
    pub fn registered_queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .inner
            .handlers
            .read()
            .map(|h| h.keys().map(|(queue, _)| queue.clone()).collect())
            .unwrap_or_default();
        queues.sort();
        queues.dedup();
        queues
    }

    /// Start a worker pool for a queue. Idempotent: an already-running
    /// pool is left untouched.
    pub async fn start_workers(&self, queue: &str, concurrency: Option<usize>) {
        let mut pools = self.pools.lock().await;
        if pools.contains_key(queue) {
            return;
        }

        let concurrency = concurrency
            .unwrap_or(self.inner.config.default_concurrency)
            .max(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(concurrency);

        for worker_idx in 0..concurrency {
            let inner = Arc::clone(&self.inner);
            let queue_name = queue.to_string();
            let shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(inner, queue_name, worker_idx, shutdown).await;
            }));
        }

        tracing::info!(queue, concurrency, "worker pool started");
        pools.insert(queue.to_string(), WorkerPool { shutdown_tx, handles });
    }

    /// Stop a queue's worker pool, draining in-flight jobs up to the
    /// shutdown grace period. Idempotent.
    pub async fn stop_workers(&self, queue: &str) {
        let pool = { self.pools.lock().await.remove(queue) };
        let Some(pool) = pool else { return };

        let _ = pool.shutdown_tx.send(true);
        let grace = Duration::from_millis(self.inner.config.shutdown_grace_ms);
        for mut handle in pool.handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                tracing::warn!(queue, "worker exceeded shutdown grace, aborting");
                handle.abort();
            }
        }
        tracing::info!(queue, "worker pool stopped");
    }

    /// Stop every worker pool.
    pub async fn shutdown(&self) {
        let queues: Vec<String> = { self.pools.lock().await.keys().cloned().collect() };
        for queue in queues {
            self.stop_workers(&queue).await;
        }
    }

    /// Replay a dead-letter entry: enqueue a fresh job from its snapshot,
    /// resolve the entry, and retire the original job row.
    pub async fn replay_dead_letter(&self, entry_id: Uuid) -> CoreResult<Uuid> {
        let entry = self.inner.dead_letters.get(entry_id).await?.ok_or_else(|| {
            CoreError::Validation(format!("dead-letter entry {entry_id} not found"))
        })?;
        if entry.is_resolved() {
            return Err(CoreError::Validation(format!(
                "dead-letter entry {entry_id} already resolved"
            )));
        }

        let snapshot = &entry.job_snapshot;
        let mut options = EnqueueOptions::for_user(&snapshot.user_id)
            .with_priority(snapshot.priority)
            .with_max_attempts(snapshot.max_attempts)
            .with_backoff_base_ms(snapshot.backoff_base_ms);
        options.mission_id = snapshot.mission_id;

        let new_id = self
            .enqueue(
                &snapshot.queue,
                &snapshot.job_type,
                snapshot.payload.clone(),
                options,
            )
            .await?;

        self.inner.dead_letters.resolve(entry_id, Utc::now()).await?;
        if let Err(e) = self.inner.jobs.mark_dead(snapshot.id).await {
            // The original row may already be purged; replay still stands.
            tracing::warn!(job_id = %snapshot.id, error = %e, "could not retire replayed job");
        }

        tracing::info!(entry_id = %entry_id, new_job_id = %new_id, "dead-letter entry replayed");
        Ok(new_id)
    }
}

impl Inner {
    fn handler_entry(&self, queue: &str, job_type: &str) -> Option<Arc<HandlerEntry>> {
        self.handlers
            .read()
            .ok()
            .and_then(|h| h.get(&(queue.to_string(), job_type.to_string())).cloned())
    }

    /// Move a job to `failed` and open its dead-letter entry.
    async fn fail_job(&self, job: &Job, error: &str, reason: FailureReason) {
        let now = Utc::now();
        if let Err(e) = self.jobs.mark_failed(job.id, error, now).await {
            tracing::error!(job_id = %job.id, error = %e, "mark_failed lost");
            return;
        }

        let mut snapshot = job.clone();
        snapshot.status = JobStatus::Failed;
        snapshot.error = Some(error.to_string());
        snapshot.completed_at = Some(now);
        let entry = DeadLetterEntry::new(snapshot, reason);
        if let Err(e) = self.dead_letters.insert(&entry).await {
            tracing::error!(job_id = %job.id, error = %e, "dead-letter insert lost");
        }

        self.telemetry.record(JobEvent::DeadLettered {
            job_id: job.id,
            queue: job.queue.clone(),
            error: error.to_string(),
        });
    }

    async fn process_job(&self, job: Job, worker_id: &str) {
        let Some(entry) = self.handler_entry(&job.queue, &job.job_type) else {
            // Registered at enqueue but gone now: a different process owns
            // this type. Park the job rather than spinning on it.
            self.fail_job(
                &job,
                "no handler registered in this process",
                FailureReason::Permanent,
            )
            .await;
            return;
        };

        self.telemetry.record(JobEvent::Started {
            job_id: job.id,
            queue: job.queue.clone(),
            job_type: job.job_type.clone(),
            attempt: job.attempts,
        });

        let timeout_ms = entry.timeout_ms.unwrap_or(self.config.default_timeout_ms);
        let (ctx, cancel_tx) = JobContext::new(job.id, &job.user_id, job.mission_id, timeout_ms);

        let handler = Arc::clone(&entry.handler);
        let payload = job.payload.clone();
        let handler_ctx = ctx.clone();
        // Spawned so a panicking handler surfaces as a JoinError instead
        // of taking the worker down.
        let mut invocation =
            tokio::spawn(async move { handler.handle(payload, handler_ctx).await });

        let started = std::time::Instant::now();
        let outcome =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), &mut invocation).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => {
                    Err(CoreError::Transient(format!("handler panicked: {join_err}")))
                }
                Err(_) => {
                    let _ = cancel_tx.send(true);
                    if tokio::time::timeout(CANCEL_GRACE, &mut invocation).await.is_err() {
                        invocation.abort();
                    }
                    Err(CoreError::DeadlineExceeded(timeout_ms))
                }
            };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(_value) => {
                if let Err(e) = self.jobs.mark_completed(job.id, Utc::now()).await {
                    self.report_write_failure(&job, worker_id, e);
                    return;
                }
                self.telemetry.record(JobEvent::Completed {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    job_type: job.job_type.clone(),
                    duration_ms,
                    mission_id: job.mission_id,
                });
            }
            Err(err) if err.is_fatal() => {
                // Consistency violation: no further writes to this job, no
                // attempt advancement beyond the claim.
                tracing::error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    worker_id,
                    error = %err,
                    "consistency violation, aborting job without progress"
                );
            }
            Err(err) if err.is_retryable() && job.has_attempts_remaining() => {
                if matches!(err, CoreError::DeadlineExceeded(_)) {
                    tracing::warn!(
                        job_id = %job.id,
                        queue = %job.queue,
                        timeout_ms,
                        "job deadline exceeded"
                    );
                }
                let backoff_ms = backoff_with_jitter(job.backoff_ms());
                let delayed_until = Utc::now() + chrono::Duration::milliseconds(backoff_ms as i64);
                if let Err(e) = self
                    .jobs
                    .mark_delayed(job.id, delayed_until, &err.to_string())
                    .await
                {
                    self.report_write_failure(&job, worker_id, e);
                    return;
                }
                self.telemetry.record(JobEvent::Retried {
                    job_id: job.id,
                    queue: job.queue.clone(),
                    attempt: job.attempts,
                    backoff_ms,
                });
            }
            Err(err) => {
                let reason = if err.is_retryable() {
                    FailureReason::RetriesExhausted
                } else {
                    FailureReason::Permanent
                };
                self.fail_job(&job, &err.to_string(), reason).await;
            }
        }
    }

    fn report_write_failure(&self, job: &Job, worker_id: &str, err: CoreError) {
        // A guarded status write that touched nothing means another writer
        // got there first; surface loudly and stop progressing this job.
        tracing::error!(
            job_id = %job.id,
            queue = %job.queue,
            worker_id,
            error = %err,
            "job status write failed"
        );
    }
}

async fn worker_loop(
    inner: Arc<Inner>,
    queue: String,
    worker_idx: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let worker_id = format!("{queue}-{worker_idx}");
    loop {
        if *shutdown.borrow() {
            break;
        }

        match inner.jobs.claim_next(&queue, &worker_id, Utc::now()).await {
            Ok(Some(job)) => {
                inner.process_job(job, &worker_id).await;
            }
            Ok(None) => {
                let sleep = jittered(Duration::from_millis(inner.config.poll_interval_ms));
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::error!(queue, worker_id, error = %e, "claim failed");
                tokio::time::sleep(jittered(Duration::from_millis(
                    inner.config.poll_interval_ms,
                )))
                .await;
            }
        }
    }
}

#[async_trait]
impl QueueStatsSource for TaskQueue {
    async fn queue_names(&self) -> CoreResult<Vec<String>> {
        self.inner.jobs.queue_names().await
    }

    async fn queue_metrics(&self, queue: &str) -> CoreResult<QueueMetrics> {
        self.inner.jobs.queue_metrics(queue).await
    }

    async fn depth_for_user(&self, user_id: &str) -> CoreResult<u64> {
        self.inner.jobs.depth_for_user(user_id).await
    }

    async fn active_for_user(&self, user_id: &str) -> CoreResult<u64> {
        self.inner.jobs.active_for_user(user_id).await
    }
}

/// Uniform jitter of ±20% around the poll interval.
fn jittered(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..1.2);
    base.mul_f64(factor)
}

/// Backoff with up to 10% additive jitter.
fn backoff_with_jitter(base_ms: u64) -> u64 {
    let factor = 1.0 + rand::thread_rng().gen_range(0.0..0.1);
    (base_ms as f64 * factor) as u64
}
