//! Command-line interface for review-harvest
//!
//! This module implements the CLI commands, loads the configuration, sets up logging
//! and progress reporting, and hands off to the [`harvest`](crate::harvest) pipeline.
//!
//! # Commands
//!
//! - **run**: Discover repositories and harvest review metrics of their pull requests
//!   into the configured output file, resuming from whatever that file already holds
//! - **init**: Generate a default configuration file
//!
//! Configuration is a TOML file (`harvest.toml` by default) whose every key is optional;
//! the embedded `default_config.toml` documents them all.

mod common;
mod config;
mod harvest;
mod host;
mod init;
mod progress_reporter;
mod run;

#[cfg(debug_assertions)]
pub use config::Config;

pub use common::{ColorMode, LogLevel};
pub use harvest::{HarvestArgs, harvest};
pub use host::Host;
pub use init::{InitArgs, init_config};
pub use progress_reporter::ProgressReporter;
pub use run::run;
