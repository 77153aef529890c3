//! Operator CLI.
//!
//! Exit codes: 0 success, 1 generic failure, 2 configuration error,
//! 3 authentication failure (reserved for deployments that front the
//! admin API).

use std::sync::Arc;

use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use uuid::Uuid;

use crate::domain::ports::{DeadLetterRepository, MissionRepository, WebhookRepository};
use crate::services::Runtime;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_AUTH: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "gpilot", about = "Autonomous operations substrate", version)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "gpilot.yaml", env = "GPILOT_CONFIG")]
    pub config: String,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the substrate: workers, tickers, and the admin API.
    Serve,
    /// Queue inspection.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Mission inspection.
    Mission {
        #[command(subcommand)]
        command: MissionCommands,
    },
    /// Dead-letter queue operations.
    Dlq {
        #[command(subcommand)]
        command: DlqCommands,
    },
    /// Webhook delivery log for an endpoint.
    Deliveries {
        /// Endpoint id.
        endpoint_id: Uuid,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueueCommands {
    /// Job counts by status for one queue.
    Stats { queue: String },
}

#[derive(Debug, Subcommand)]
pub enum MissionCommands {
    /// Show one mission with its audit trail.
    Show { id: Uuid },
    /// Recent missions for a user.
    List {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum DlqCommands {
    /// Unresolved dead-letter entries.
    List {
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Re-enqueue a dead-letter entry and resolve it.
    Replay { id: Uuid },
}

/// Dispatch a parsed command against an assembled runtime.
pub async fn dispatch(cli: &Cli, runtime: Arc<Runtime>) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Serve => serve(runtime).await,
        Commands::Queue { command } => match command {
            QueueCommands::Stats { queue } => queue_stats(&runtime, queue, cli.json).await,
        },
        Commands::Mission { command } => match command {
            MissionCommands::Show { id } => mission_show(&runtime, *id, cli.json).await,
            MissionCommands::List { user, limit } => {
                mission_list(&runtime, user, *limit, cli.json).await
            }
        },
        Commands::Dlq { command } => match command {
            DlqCommands::List { limit } => dlq_list(&runtime, *limit, cli.json).await,
            DlqCommands::Replay { id } => dlq_replay(&runtime, *id).await,
        },
        Commands::Deliveries { endpoint_id, limit } => {
            deliveries(&runtime, *endpoint_id, *limit, cli.json).await
        }
    }
}

async fn serve(runtime: Arc<Runtime>) -> anyhow::Result<()> {
    runtime.start().await;

    let api = tokio::spawn(crate::adapters::http::serve(runtime.clone()));
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    runtime.shutdown().await;
    api.abort();
    Ok(())
}

async fn queue_stats(runtime: &Runtime, queue: &str, json: bool) -> anyhow::Result<()> {
    let metrics = runtime.queue.get_queue_metrics(queue).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["waiting", "active", "completed", "failed", "delayed"]);
    table.add_row(vec![
        Cell::new(metrics.waiting),
        Cell::new(metrics.active),
        Cell::new(metrics.completed),
        Cell::new(metrics.failed),
        Cell::new(metrics.delayed),
    ]);
    println!("{table}");
    Ok(())
}

async fn mission_show(runtime: &Runtime, id: Uuid, json: bool) -> anyhow::Result<()> {
    let mission = runtime
        .missions
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("mission {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&mission)?);
        return Ok(());
    }

    println!("mission {}", mission.id);
    println!("  user:       {}", mission.user_id);
    println!("  status:     {}", mission.status.as_str());
    println!("  total cost: {} credits", mission.total_cost);
    if let Some(ref failed_at) = mission.failed_at {
        println!("  failed at:  {failed_at}");
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["step", "outcome", "detail"]);
    for outcome in &mission.audit {
        match outcome {
            crate::domain::models::StepOutcome::Completed {
                agent,
                cost_credits,
                duration_ms,
                ..
            } => {
                table.add_row(vec![
                    Cell::new(agent),
                    Cell::new("completed"),
                    Cell::new(format!("{cost_credits} credits, {duration_ms} ms")),
                ]);
            }
            crate::domain::models::StepOutcome::Failed { agent, error } => {
                table.add_row(vec![Cell::new(agent), Cell::new("failed"), Cell::new(error)]);
            }
            crate::domain::models::StepOutcome::Skipped { agent, reason } => {
                table.add_row(vec![Cell::new(agent), Cell::new("skipped"), Cell::new(reason)]);
            }
        }
    }
    println!("{table}");
    Ok(())
}

async fn mission_list(runtime: &Runtime, user: &str, limit: usize, json: bool) -> anyhow::Result<()> {
    let missions = runtime.missions.list_recent(user, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&missions)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "status", "cost", "created"]);
    for mission in missions {
        table.add_row(vec![
            Cell::new(mission.id),
            Cell::new(mission.status.as_str()),
            Cell::new(mission.total_cost),
            Cell::new(mission.created_at.to_rfc3339()),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn dlq_list(runtime: &Runtime, limit: usize, json: bool) -> anyhow::Result<()> {
    let entries = runtime.dead_letters.list_unresolved(limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "queue", "type", "reason", "error", "entered"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(&entry.job_snapshot.queue),
            Cell::new(&entry.job_snapshot.job_type),
            Cell::new(entry.failure_reason.as_str()),
            Cell::new(entry.last_error.as_deref().unwrap_or("-")),
            Cell::new(entry.entered_at.to_rfc3339()),
        ]);
    }
    println!("{table}");
    Ok(())
}

async fn dlq_replay(runtime: &Runtime, id: Uuid) -> anyhow::Result<()> {
    let job_id = runtime.queue.replay_dead_letter(id).await?;
    println!("replayed as job {job_id}");
    Ok(())
}

async fn deliveries(
    runtime: &Runtime,
    endpoint_id: Uuid,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let deliveries = runtime.webhooks.list_deliveries(endpoint_id, limit).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&deliveries)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["id", "event", "status", "attempts", "code", "sent"]);
    for delivery in deliveries {
        table.add_row(vec![
            Cell::new(delivery.id),
            Cell::new(&delivery.event_type),
            Cell::new(delivery.status.as_str()),
            Cell::new(delivery.attempts),
            Cell::new(
                delivery
                    .response_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".into()),
            ),
            Cell::new(
                delivery
                    .sent_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".into()),
            ),
        ]);
    }
    println!("{table}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_queue_stats() {
        let cli = Cli::parse_from(["gpilot", "queue", "stats", "webhooks"]);
        assert!(matches!(
            cli.command,
            Commands::Queue {
                command: QueueCommands::Stats { ref queue }
            } if queue == "webhooks"
        ));
    }

    #[test]
    fn parses_dlq_replay_with_uuid() {
        let id = Uuid::new_v4();
        let cli = Cli::parse_from(["gpilot", "dlq", "replay", &id.to_string()]);
        assert!(matches!(
            cli.command,
            Commands::Dlq {
                command: DlqCommands::Replay { id: parsed }
            } if parsed == id
        ));
    }
}
