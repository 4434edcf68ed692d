//! CLI Adapter
//!
//! Command-line control surface. Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{
    execute, CliApp, Command, EnableCmd, PositionCmd, RefreshCmd, RunCmd, StatusCmd, VelocityCmd,
};
