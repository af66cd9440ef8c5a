//! Subcommand implementations

pub mod results;
pub mod status;
