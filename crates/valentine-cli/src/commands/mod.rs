//! CLI subcommand implementations.

pub mod analyze;
pub mod config;
pub mod rules;
