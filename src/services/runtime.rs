//! Composition root.
//!
//! Builds every component from configuration, owns the periodic tasks
//! (snapshotter, alert evaluator, schedule sweeper, retention sweeper),
//! and makes shutdown deterministic: no component spawns background
//! work the runtime does not hold a handle for. Process-wide state ends
//! here; tests build a `Runtime` against `sqlite::memory:` and swap in
//! fakes through the builder hooks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::adapters::sqlite::{
    self, SqliteAgentStatusRepository, SqliteAlertRepository, SqliteDeadLetterRepository,
    SqliteJobRepository, SqliteMissionRepository, SqliteScheduleRepository,
    SqliteSnapshotRepository, SqliteWebhookRepository,
};
use crate::domain::errors::{CoreError, CoreResult};
use crate::domain::models::{EnqueueOptions, Mission, MissionPlan, MissionStatus, WebhookEvent};
use crate::domain::ports::{
    DeadLetterRepository, JobRepository, Notifier, NullNotifier, NullWallet, PlaintextVault,
    SecretVault, TracingTelemetrySink, WalletProvider, WebhookRepository,
};
use crate::services::agent_executor::AgentExecutor;
use crate::services::alert_evaluator::AlertEvaluator;
use crate::services::config::Config;
use crate::services::metrics_collector::MetricsCollector;
use crate::services::mission_executor::{MissionConfig, MissionExecutor};
use crate::services::schedule_service::ScheduleService;
use crate::services::snapshotter::Snapshotter;
use crate::services::task_queue::{QueueConfig, TaskQueue};
use crate::services::webhook_dispatcher::{
    DeliverPayload, DispatcherConfig, WebhookDispatcher, DELIVER_JOB_TYPE, WEBHOOK_QUEUE,
};

/// Queue carrying mission-run jobs.
pub const MISSION_QUEUE: &str = "missions";

/// Job type driving one mission DAG.
pub const RUN_MISSION_JOB_TYPE: &str = "run_mission";

/// Terminal jobs, deliveries, and resolved dead letters are kept this
/// many days.
const JOB_RETENTION_DAYS: i64 = 30;

/// Cadence of the retention sweep.
const RETENTION_SWEEP: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMissionPayload {
    mission_id: Uuid,
}

/// Optional collaborator overrides for the composition root.
#[derive(Default)]
pub struct Collaborators {
    pub notifier: Option<Arc<dyn Notifier>>,
    pub wallet: Option<Arc<dyn WalletProvider>>,
    pub vault: Option<Arc<dyn SecretVault>>,
}

/// The assembled substrate.
pub struct Runtime {
    pub config: Config,
    pub jobs: Arc<SqliteJobRepository>,
    pub missions: Arc<SqliteMissionRepository>,
    pub agent_statuses: Arc<SqliteAgentStatusRepository>,
    pub dead_letters: Arc<SqliteDeadLetterRepository>,
    pub alerts: Arc<SqliteAlertRepository>,
    pub webhooks: Arc<SqliteWebhookRepository>,
    pub queue: Arc<TaskQueue>,
    pub agents: Arc<AgentExecutor>,
    pub mission_executor: Arc<MissionExecutor>,
    pub collector: Arc<MetricsCollector>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub schedules: Arc<ScheduleService>,
    evaluator: Mutex<Option<AlertEvaluator>>,
    snapshotter: Mutex<Option<Snapshotter>>,
    schedule_runner: Mutex<Option<ScheduleService>>,
    shutdown_tx: watch::Sender<bool>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub async fn new(config: Config) -> CoreResult<Arc<Self>> {
        Self::with_collaborators(config, Collaborators::default()).await
    }

    pub async fn with_collaborators(
        config: Config,
        collaborators: Collaborators,
    ) -> CoreResult<Arc<Self>> {
        let pool = sqlite::create_pool(&config.db_url, None).await?;
        sqlite::run_migrations(&pool).await?;

        let jobs = Arc::new(SqliteJobRepository::new(pool.clone()));
        let missions = Arc::new(SqliteMissionRepository::new(pool.clone()));
        let agent_statuses = Arc::new(SqliteAgentStatusRepository::new(pool.clone()));
        let dead_letters = Arc::new(SqliteDeadLetterRepository::new(pool.clone()));
        let snapshots = Arc::new(SqliteSnapshotRepository::new(pool.clone()));
        let alerts = Arc::new(SqliteAlertRepository::new(pool.clone()));
        let webhooks = Arc::new(SqliteWebhookRepository::new(pool.clone()));
        let schedule_repo = Arc::new(SqliteScheduleRepository::new(pool));

        let queue = Arc::new(TaskQueue::new(
            jobs.clone(),
            dead_letters.clone(),
            Arc::new(TracingTelemetrySink),
            QueueConfig {
                poll_interval_ms: config.queue_poll_interval_ms,
                default_concurrency: config.queue_default_concurrency,
                default_timeout_ms: config.job_default_timeout_ms,
                shutdown_grace_ms: config.shutdown_grace_ms,
            },
        ));

        let agents = Arc::new(AgentExecutor::new(agent_statuses.clone()));
        let mission_executor = Arc::new(MissionExecutor::new(
            missions.clone(),
            agents.clone(),
            MissionConfig {
                parallelism_cap: config.dag_parallelism_cap,
            },
        ));

        // The collector reads live queue state through the stats seam the
        // queue implements; it never names the queue's concrete type in
        // its own signature.
        let collector = Arc::new(MetricsCollector::new(
            queue.clone(),
            jobs.clone(),
            missions.clone(),
            agent_statuses.clone(),
            dead_letters.clone(),
            alerts.clone(),
            snapshots.clone(),
        ));

        let vault = collaborators
            .vault
            .unwrap_or_else(|| Arc::new(PlaintextVault));
        let dispatcher = Arc::new(WebhookDispatcher::new(
            webhooks.clone(),
            vault,
            queue.clone(),
            DispatcherConfig {
                timeout_ms: config.webhook_timeout_ms,
                max_attempts: config.webhook_max_attempts,
                backoff_base_ms: 2_000,
            },
        ));

        let notifier = collaborators
            .notifier
            .unwrap_or_else(|| Arc::new(NullNotifier));
        let wallet = collaborators.wallet.unwrap_or_else(|| Arc::new(NullWallet));
        let evaluator = AlertEvaluator::new(
            alerts.clone(),
            collector.clone(),
            wallet,
            notifier,
            dispatcher.clone(),
        );

        let snapshotter = Snapshotter::new(
            collector.clone(),
            snapshots,
            jobs.clone(),
            Duration::from_millis(config.metrics_snapshot_interval_ms),
        );

        let schedules = Arc::new(ScheduleService::new(schedule_repo.clone(), queue.clone()));
        let schedule_runner = ScheduleService::new(schedule_repo, queue.clone());

        let (shutdown_tx, _) = watch::channel(false);

        let runtime = Arc::new(Self {
            config,
            jobs,
            missions,
            agent_statuses,
            dead_letters,
            alerts,
            webhooks,
            queue,
            agents,
            mission_executor,
            collector,
            dispatcher,
            schedules,
            evaluator: Mutex::new(Some(evaluator)),
            snapshotter: Mutex::new(Some(snapshotter)),
            schedule_runner: Mutex::new(Some(schedule_runner)),
            shutdown_tx,
            tickers: Mutex::new(Vec::new()),
        });

        runtime.register_builtin_handlers()?;
        Ok(runtime)
    }

    /// Wire the queues the substrate itself owns: webhook delivery and
    /// mission driving.
    fn register_builtin_handlers(&self) -> CoreResult<()> {
        let dispatcher = self.dispatcher.clone();
        self.queue.register(
            WEBHOOK_QUEUE,
            DELIVER_JOB_TYPE,
            move |payload: DeliverPayload, _ctx| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.deliver(payload.delivery_id).await }
            },
        )?;

        let executor = self.mission_executor.clone();
        let dispatcher = self.dispatcher.clone();
        self.queue.register(
            MISSION_QUEUE,
            RUN_MISSION_JOB_TYPE,
            move |payload: RunMissionPayload, ctx| {
                let executor = executor.clone();
                let dispatcher = dispatcher.clone();
                async move {
                    let mission = executor.run(payload.mission_id, &ctx).await?;
                    announce_mission(&dispatcher, &mission).await;
                    Ok(serde_json::json!({
                        "mission_id": mission.id,
                        "status": mission.status.as_str(),
                        "total_cost": mission.total_cost,
                    }))
                }
            },
        )?;

        Ok(())
    }

    /// Validate, persist, and enqueue a mission. Returns its id.
    pub async fn submit_mission(&self, user_id: &str, plan: MissionPlan) -> CoreResult<Uuid> {
        let mission = self.mission_executor.submit(user_id, plan).await?;

        let mut options = EnqueueOptions::for_user(user_id);
        options.mission_id = Some(mission.id);
        self.queue
            .enqueue(
                MISSION_QUEUE,
                RUN_MISSION_JOB_TYPE,
                serde_json::to_value(RunMissionPayload {
                    mission_id: mission.id,
                })?,
                options,
            )
            .await?;

        Ok(mission.id)
    }

    /// Start worker pools for every registered queue and spawn the
    /// periodic tasks.
    pub async fn start(&self) {
        for queue_name in self.queue.registered_queues() {
            self.queue.start_workers(&queue_name, None).await;
        }

        let mut tickers = self.tickers.lock().await;

        if let Some(snapshotter) = self.snapshotter.lock().await.take() {
            let shutdown = self.shutdown_tx.subscribe();
            tickers.push(tokio::spawn(snapshotter.run(shutdown)));
        }

        if let Some(evaluator) = self.evaluator.lock().await.take() {
            let shutdown = self.shutdown_tx.subscribe();
            let interval = Duration::from_millis(self.config.alert_eval_interval_ms);
            tickers.push(tokio::spawn(evaluator.run(interval, shutdown)));
        }

        if let Some(schedule_runner) = self.schedule_runner.lock().await.take() {
            let shutdown = self.shutdown_tx.subscribe();
            tickers.push(tokio::spawn(schedule_runner.run(shutdown)));
        }

        tickers.push(tokio::spawn(retention_sweep(
            self.jobs.clone(),
            self.webhooks.clone(),
            self.dead_letters.clone(),
            self.shutdown_tx.subscribe(),
        )));

        tracing::info!("runtime started");
    }

    /// Stop claiming, drain in-flight work up to the grace period, and
    /// end the periodic tasks.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.queue.shutdown().await;

        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        let mut tickers = self.tickers.lock().await;
        for mut handle in tickers.drain(..) {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        tracing::info!("runtime stopped");
    }
}

/// Announce a terminal mission to webhook subscribers.
async fn announce_mission(dispatcher: &WebhookDispatcher, mission: &Mission) {
    let (event_type, data) = match mission.status {
        MissionStatus::Completed => (
            "mission.completed",
            serde_json::json!({
                "id": mission.id,
                "total_cost": mission.total_cost,
                "agent_costs": mission.agent_costs,
            }),
        ),
        MissionStatus::Failed => (
            "mission.failed",
            serde_json::json!({
                "id": mission.id,
                "failed_at": mission.failed_at,
            }),
        ),
        _ => return,
    };

    let event = WebhookEvent::new(event_type, data, &mission.user_id);
    if let Err(e) = dispatcher.dispatch(&event).await {
        tracing::warn!(mission_id = %mission.id, error = %e, "mission announcement lost");
    }
}

/// Hourly pass deleting expired terminal jobs, old deliveries, and aged
/// dead letters.
async fn retention_sweep(
    jobs: Arc<SqliteJobRepository>,
    webhooks: Arc<SqliteWebhookRepository>,
    dead_letters: Arc<SqliteDeadLetterRepository>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(RETENTION_SWEEP);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::days(JOB_RETENTION_DAYS);
                if let Err(e) = jobs.purge_terminal(cutoff).await {
                    tracing::warn!(error = %e, "job retention sweep failed");
                }
                if let Err(e) = webhooks.prune_deliveries(cutoff).await {
                    tracing::warn!(error = %e, "delivery retention sweep failed");
                }
                if let Err(e) = dead_letters.purge(cutoff).await {
                    tracing::warn!(error = %e, "dead-letter retention sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Map a core error to the operator exit code.
pub fn exit_code(err: &CoreError) -> i32 {
    match err {
        CoreError::Validation(_) => 2,
        _ => 1,
    }
}
