//! Stage types

use serde::{Deserialize, Serialize};

/// An uploaded sealed buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedUnit {
    /// Destination the records belong to
    pub destination: String,
    /// Batch index within the destination
    pub batch: u64,
    /// Path of the file inside the stage
    pub remote_path: String,
    /// Number of records
    pub rows: u64,
    /// Size in bytes
    pub bytes: u64,
}
