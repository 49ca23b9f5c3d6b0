//! CLI subcommands

pub mod loadtest;
pub mod monitor;
