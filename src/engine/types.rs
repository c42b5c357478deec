//! Engine types
//!
//! Run statistics and the final export report.

use crate::destination::{DestinationReport, DestinationStatus};
use crate::error::{Error, Result};
use crate::types::{JobOutcome, RunState};
use serde::Serialize;

/// Maximum number of rejection messages kept in a report
pub const MAX_REJECTIONS: usize = 100;

/// Statistics of an export run
#[derive(Debug, Clone, Default)]
pub struct ExportStats {
    /// Records routed to a destination
    pub records_accepted: u64,
    /// Records rejected at submission
    pub records_rejected: u64,
    /// First rejection messages
    pub rejections: Vec<String>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExportStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted record
    pub fn add_accepted(&mut self) {
        self.records_accepted += 1;
    }

    /// Count a rejected record, keeping the first messages
    pub fn add_rejected(&mut self, message: impl Into<String>) {
        self.records_rejected += 1;
        if self.rejections.len() < MAX_REJECTIONS {
            self.rejections.push(message.into());
        }
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}

/// Final report of an export run
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// Outcome of the job that fed the run
    pub outcome: JobOutcome,
    /// Terminal state of the run
    pub state: RunState,
    /// Records routed to a destination
    pub records_accepted: u64,
    /// Records rejected at submission
    pub records_rejected: u64,
    /// First rejection messages
    pub rejections: Vec<String>,
    /// Per-destination summaries, in first-seen order
    pub destinations: Vec<DestinationReport>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExportReport {
    /// Destinations that failed
    pub fn failed_destinations(&self) -> impl Iterator<Item = &DestinationReport> {
        self.destinations.iter().filter(|d| d.is_failed())
    }

    /// Number of destinations with the given status
    pub fn count(&self, status: DestinationStatus) -> usize {
        self.destinations
            .iter()
            .filter(|d| d.status == status)
            .count()
    }

    /// Check if the run completed after a successful job with no failed destination
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done && self.failed_destinations().next().is_none()
    }

    /// Turn a report with failed destinations into an error
    pub fn into_result(self) -> Result<Self> {
        let failed = self.failed_destinations().count();
        if failed > 0 {
            return Err(Error::ExportFailed {
                failed,
                total: self.destinations.len(),
            });
        }
        Ok(self)
    }
}
