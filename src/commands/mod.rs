//! CLI subcommands

pub mod history;
