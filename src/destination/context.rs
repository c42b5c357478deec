//! Shared export context

use crate::config::ExportSettings;
use crate::database::Warehouse;
use crate::error::Result;
use crate::stage::StageUploader;
use crate::types::{CancelHandle, JsonObject, JsonValue};
use chrono::Utc;
use std::sync::Arc;

/// Settings and collaborators shared by every destination of a run
pub struct ExportContext {
    /// Compiled settings
    pub settings: ExportSettings,
    /// Stage sealed buffers are uploaded to
    pub stage: Arc<dyn StageUploader>,
    /// Warehouse destination tables live in
    pub warehouse: Arc<dyn Warehouse>,
    /// Run start, epoch milliseconds
    pub instance_ms: i64,
    /// Run start date (UTC, `YYYY-MM-DD`)
    pub date: String,
    /// Cancellation flag of the run
    pub cancel: CancelHandle,
}

impl ExportContext {
    /// Create a context for a run starting now
    pub fn new(
        settings: ExportSettings,
        stage: Arc<dyn StageUploader>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let now = Utc::now();
        Self {
            settings,
            stage,
            warehouse,
            instance_ms: now.timestamp_millis(),
            date: now.format("%Y-%m-%d").to_string(),
            cancel: CancelHandle::new(),
        }
    }

    /// Resolve the stage path of a sealed buffer
    pub fn stage_path(&self, destination: &str, batch: u64) -> Result<String> {
        let mut vars = JsonObject::new();
        vars.insert("destination".into(), JsonValue::from(destination));
        vars.insert("job".into(), JsonValue::from(self.settings.job.as_str()));
        vars.insert("batch".into(), JsonValue::from(batch));
        vars.insert("instance_ms".into(), JsonValue::from(self.instance_ms));
        vars.insert("date".into(), JsonValue::from(self.date.as_str()));
        self.settings.stage_path.resolve(&vars)
    }

    /// Check if the run was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ExportContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportContext")
            .field("settings", &self.settings)
            .field("instance_ms", &self.instance_ms)
            .field("date", &self.date)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
