//! Subcommand implementations

pub mod clean_cache;
pub mod run;
