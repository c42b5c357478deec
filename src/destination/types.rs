//! Destination report types

use crate::stage::StagedUnit;
use serde::Serialize;
use std::path::PathBuf;

/// Final state of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationStatus {
    /// Every staged unit was loaded into the table
    Loaded,
    /// Data is staged; loading was skipped or left to later
    Staged,
    /// A step failed
    Failed,
}

impl std::fmt::Display for DestinationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationStatus::Loaded => write!(f, "loaded"),
            DestinationStatus::Staged => write!(f, "staged"),
            DestinationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of one destination at the end of a run
#[derive(Debug, Clone, Serialize)]
pub struct DestinationReport {
    /// Resolved destination path
    pub destination: String,
    /// Final status
    pub status: DestinationStatus,
    /// Records routed to the destination
    pub rows: u64,
    /// Uploaded units, in staging order
    pub staged_units: Vec<StagedUnit>,
    /// Whether the table was created during the run
    pub created: bool,
    /// Number of staged units loaded into the table
    pub populated_units: usize,
    /// Steps skipped, with the reason
    pub skipped: Vec<String>,
    /// Errors recorded for the destination
    pub errors: Vec<String>,
    /// Local files kept because they could not be uploaded
    pub unstaged_files: Vec<PathBuf>,
}

impl DestinationReport {
    /// Check if the destination failed
    pub fn is_failed(&self) -> bool {
        self.status == DestinationStatus::Failed
    }
}
