//! Subcommand implementations

pub mod alerts;
pub mod ingest;
pub mod risk;
pub mod sensors;
