//! G-Pilot operations substrate.
//!
//! The autonomous-operations core underlying every mission:
//! - Durable task queue with priorities, delays, retries, and a
//!   dead-letter queue
//! - Agent registry and executor with cost and duration accounting
//! - DAG mission executor with guard conditions and per-agent cost
//!   attribution
//! - Metrics collector, minute snapshotter, and time-series queries
//! - Threshold alert evaluation with multi-channel notification
//! - Signed webhook fan-out with at-least-once delivery
//!
//! Everything durable lives behind the repository ports in
//! [`domain::ports`]; SQLite (WAL mode) implements them in
//! [`adapters::sqlite`]. The [`services::Runtime`] composition root wires
//! the pieces together and owns every background task.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{CoreError, CoreResult};
pub use services::{Config, Runtime};
