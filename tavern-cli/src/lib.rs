//! # tavern-cli
//!
//! Administration and inspection for the memory engine: schema init,
//! conversation lifecycle, rule import and read-only views of memory, state and
//! relationships.

pub mod cli;
pub mod commands;
pub mod logger;

pub use cli::{Cli, Commands};
pub use logger::init_tracing;
