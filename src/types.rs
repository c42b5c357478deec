//! Common types used throughout the stage exporter
//!
//! This module contains shared type definitions, type aliases,
//! and small policy enums used across multiple modules.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type, used for records and template variables
pub type JsonObject = serde_json::Map<String, JsonValue>;

// ============================================================================
// Trigger Policy
// ============================================================================

/// When a lifecycle step (create, populate, clear stage) fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerPolicy {
    /// Right after each buffer is staged
    #[serde(rename = "flush", alias = "on_flush", alias = "on-flush")]
    OnFlush,
    /// Once, after every buffer is staged at the end of a successful run
    #[default]
    #[serde(rename = "finish", alias = "on_finish", alias = "on-finish")]
    OnFinish,
    /// Never
    #[serde(rename = "never")]
    Never,
}

impl TriggerPolicy {
    /// Check if the step fires on every flush
    pub fn on_flush(self) -> bool {
        self == TriggerPolicy::OnFlush
    }

    /// Check if the step fires once at finish
    pub fn on_finish(self) -> bool {
        self == TriggerPolicy::OnFinish
    }
}

impl std::fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerPolicy::OnFlush => write!(f, "flush"),
            TriggerPolicy::OnFinish => write!(f, "finish"),
            TriggerPolicy::Never => write!(f, "never"),
        }
    }
}

// ============================================================================
// Job Outcome
// ============================================================================

/// Final outcome of the job feeding records into the exporter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job completed normally
    Success,
    /// The job ended abnormally
    Failure(String),
}

impl JobOutcome {
    /// Create a failure outcome
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure(reason.into())
    }

    /// Check if the job succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

// ============================================================================
// Run State
// ============================================================================

/// Lifecycle state of an export run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Records are being accepted
    Accepting,
    /// Buffers are being staged and destinations loaded
    Finishing,
    /// Finished after a successful job
    Done,
    /// Finished after a failed job
    Failed,
}

impl RunState {
    /// Check if the state is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Backoff strategy for retrying uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation flag shared by an export run
///
/// Cancelling never stops staging; it only skips the remaining create,
/// populate and clear steps.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Create a handle that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
