//! End-to-end task queue behavior through an assembled runtime.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use gpilot::domain::errors::CoreError;
use gpilot::domain::models::{EnqueueOptions, JobStatus};
use gpilot::domain::ports::{DeadLetterRepository, JobRepository};
use serde::Deserialize;

use common::{test_runtime, wait_until};

#[derive(Debug, Deserialize)]
struct Empty {}

#[tokio::test]
async fn retry_schedule_applies_exponential_backoff() {
    let runtime = test_runtime().await;

    let attempt_times: Arc<Mutex<Vec<std::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = attempt_times.clone();
    runtime
        .queue
        .register("jobs", "always-transient", move |_p: Empty, _ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(std::time::Instant::now());
                Err(CoreError::Transient("injected".into()))
            }
        })
        .unwrap();

    let job_id = runtime
        .queue
        .enqueue(
            "jobs",
            "always-transient",
            serde_json::json!({}),
            EnqueueOptions::for_user("u1")
                .with_max_attempts(3)
                .with_backoff_base_ms(100),
        )
        .await
        .unwrap();

    runtime.queue.start_workers("jobs", Some(1)).await;

    let jobs = runtime.jobs.clone();
    let job = wait_until(Duration::from_secs(15), "job to exhaust retries", || {
        let jobs = jobs.clone();
        async move {
            jobs.get(job_id)
                .await
                .ok()
                .flatten()
                .filter(|j| j.status == JobStatus::Failed)
        }
    })
    .await;
    runtime.queue.stop_workers("jobs").await;

    assert_eq!(job.attempts, 3);

    // Three attempts: delays of at least 100 ms then 200 ms between them.
    let times = attempt_times.lock().unwrap();
    assert_eq!(times.len(), 3);
    assert!(times[1].duration_since(times[0]) >= Duration::from_millis(100));
    assert!(times[2].duration_since(times[1]) >= Duration::from_millis(200));

    // Exactly one dead-letter entry exists for the job.
    let entries = runtime.dead_letters.list_unresolved(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].job_snapshot.id, job_id);

    runtime.shutdown().await;
}

#[tokio::test]
async fn priority_order_within_queue() {
    let runtime = test_runtime().await;

    let order: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();

    #[derive(Debug, Deserialize)]
    struct Tagged {
        tag: i64,
    }

    runtime
        .queue
        .register("ordered", "tagged", move |p: Tagged, _ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(p.tag);
                Ok(serde_json::Value::Null)
            }
        })
        .unwrap();

    // Enqueued out of priority order; lower priority number runs first.
    for (tag, priority) in [(3, 30), (1, 10), (2, 20)] {
        runtime
            .queue
            .enqueue(
                "ordered",
                "tagged",
                serde_json::json!({"tag": tag}),
                EnqueueOptions::for_user("u1").with_priority(priority),
            )
            .await
            .unwrap();
    }

    // A single worker drains in strict order.
    runtime.queue.start_workers("ordered", Some(1)).await;
    let order_check = order.clone();
    wait_until(Duration::from_secs(10), "all jobs to run", || {
        let order_check = order_check.clone();
        async move { (order_check.lock().unwrap().len() == 3).then_some(()) }
    })
    .await;
    runtime.queue.stop_workers("ordered").await;

    assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    runtime.shutdown().await;
}

#[tokio::test]
async fn completed_and_dead_are_never_left() {
    let runtime = test_runtime().await;

    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    runtime
        .queue
        .register("once", "ok", move |_p: Empty, _ctx| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        })
        .unwrap();

    let job_id = runtime
        .queue
        .enqueue("once", "ok", serde_json::json!({}), EnqueueOptions::for_user("u1"))
        .await
        .unwrap();

    runtime.queue.start_workers("once", Some(2)).await;
    let jobs = runtime.jobs.clone();
    wait_until(Duration::from_secs(10), "job completion", || {
        let jobs = jobs.clone();
        async move {
            jobs.get(job_id)
                .await
                .ok()
                .flatten()
                .filter(|j| j.status == JobStatus::Completed)
                .map(|_| ())
        }
    })
    .await;

    // Give any second worker a chance to (incorrectly) pick it up again.
    tokio::time::sleep(Duration::from_millis(150)).await;
    runtime.queue.stop_workers("once").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let job = runtime.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    runtime.shutdown().await;
}

#[tokio::test]
async fn claim_on_empty_queue_returns_immediately() {
    let runtime = test_runtime().await;
    let started = std::time::Instant::now();
    let claimed = runtime
        .jobs
        .claim_next("empty-queue", "w1", Utc::now())
        .await
        .unwrap();
    assert!(claimed.is_none());
    assert!(started.elapsed() < Duration::from_millis(600));
    runtime.shutdown().await;
}
