//! CLI module
//!
//! Command-line host that feeds JSON lines into an export run.
//!
//! # Commands
//!
//! - `export` - Stage and load records read from a file or stdin
//! - `infer` - Dry run that only routes records and infers their schemas
//! - `validate` - Check an exporter configuration

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
