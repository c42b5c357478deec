// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Stage Exporter
//!
//! Streams heterogeneous JSON records into warehouse tables through an
//! object-storage stage.
//!
//! ## Features
//!
//! - **Record Routing**: A path template picks each record's destination table
//! - **Schema Inference**: Column types are discovered from the records themselves
//! - **Local Buffers**: Newline-delimited JSON files rolled over at a size threshold
//! - **Staging**: Uploads to S3, R2, GCS, Azure or a local directory, with retries
//! - **Loading**: Create, populate and clear-stage steps triggered per flush or at finish
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stage_exporter::{config::ExporterConfig, engine::Exporter, JobOutcome};
//!
//! #[tokio::main]
//! async fn main() -> stage_exporter::Result<()> {
//!     let mut config = ExporterConfig::new("RAW.{{ item.kind }}");
//!     config.stage.url = "s3://my-bucket/stage".to_string();
//!
//!     let mut exporter = Exporter::from_config(&config)?;
//!     let record = serde_json::json!({"kind": "users", "id": 1});
//!     if let serde_json::Value::Object(record) = record {
//!         exporter.submit_record(record, &Default::default()).await?;
//!     }
//!
//!     let report = exporter.finish(JobOutcome::Success).await?;
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Exporter                              │
//! │  submit_record(record, vars) → destination    finish(outcome)   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │ Template │  Schema   │  Destination  │   Stage   │  Warehouse  │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ item.*   │ Inference │ Buffer        │ S3 / R2   │ DuckDB      │
//! │ extra    │ Predefined│ Lifecycle     │ GCS / Az  │ read_json   │
//! │ default  │ Conflicts │ Report        │ Local     │             │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the stage exporter
pub mod error;

/// Common types and type aliases
pub mod types;

/// Destination and stage path templates
pub mod template;

/// Schema inference from JSON records
pub mod schema;

/// Local newline-delimited JSON buffers
pub mod buffer;

/// Object storage stage and uploads
pub mod stage;

/// Warehouse interface and DuckDB implementation
pub mod database;

/// Per-destination buffering and load lifecycle
pub mod destination;

/// Record routing and run lifecycle
pub mod engine;

/// Exporter configuration
pub mod config;

/// Command-line interface
pub mod cli;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use config::{load_config, load_config_from_str, ExporterConfig};
pub use engine::{ExportReport, Exporter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
