//! HTTP adapters: the administrative API.

pub mod admin_api;

pub use admin_api::{router, serve, ApiState};
