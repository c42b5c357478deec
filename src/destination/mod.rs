//! Destination module
//!
//! One manager per resolved destination path. A manager owns the active
//! buffer and the schema tracker of its destination, stages sealed buffers
//! and drives the create, populate and clear steps.
//!
//! # Overview
//!
//! - `DestinationManager` - Buffering, staging and loading of one destination
//! - `ExportContext` - Settings and collaborators shared by all managers of a run
//! - `DestinationReport` - Final per-destination summary

mod context;
mod manager;
mod types;

pub use context::ExportContext;
pub use manager::DestinationManager;
pub use types::{DestinationReport, DestinationStatus};

#[cfg(test)]
mod tests;
