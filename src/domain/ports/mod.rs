//! Ports: the interfaces between domain logic and the outside world.

pub mod agent_status_repository;
pub mod alert_repository;
pub mod dead_letter_repository;
pub mod job_repository;
pub mod mission_repository;
pub mod notifier;
pub mod schedule_repository;
pub mod secret_vault;
pub mod snapshot_repository;
pub mod telemetry;
pub mod wallet;
pub mod webhook_repository;

pub use agent_status_repository::{AgentCounts, AgentStatusRepository};
pub use alert_repository::AlertRepository;
pub use dead_letter_repository::DeadLetterRepository;
pub use job_repository::JobRepository;
pub use mission_repository::MissionRepository;
pub use notifier::{Notifier, NullNotifier};
pub use schedule_repository::ScheduleRepository;
pub use secret_vault::{PlaintextVault, SecretVault};
pub use snapshot_repository::SnapshotRepository;
pub use telemetry::{JobEvent, QueueStatsSource, TelemetrySink, TracingTelemetrySink};
pub use wallet::{NullWallet, WalletProvider};
pub use webhook_repository::WebhookRepository;
