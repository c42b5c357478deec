//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stage exporter CLI
#[derive(Parser, Debug)]
#[command(name = "stage-exporter")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage JSON lines and load them into the warehouse
    Export {
        /// Exporter configuration file (YAML)
        #[arg(short = 'C', long)]
        config: PathBuf,

        /// Input file with one JSON object per line (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Job name used in stage paths (overrides the configuration)
        #[arg(long)]
        job: Option<String>,

        /// Extra template variable, as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Route records and infer destination schemas without staging anything
    Infer {
        /// Exporter configuration file (YAML)
        #[arg(short = 'C', long)]
        config: PathBuf,

        /// Input file with one JSON object per line (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Extra template variable, as key=value (repeatable)
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Validate an exporter configuration
    Validate {
        /// Exporter configuration file (YAML)
        #[arg(short = 'C', long)]
        config: PathBuf,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one message per line)
    Json,
    /// Human-readable output
    Pretty,
}

/// Parse a `key=value` pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid variable '{s}': expected key=value"))?;
    if key.is_empty() {
        return Err(format!("invalid variable '{s}': empty key"));
    }
    Ok((key.to_string(), value.to_string()))
}
