//! Process-level infrastructure: logging setup.

pub mod logging;
