//! Export engine module
//!
//! Record routing and run lifecycle.
//!
//! # Overview
//!
//! The engine module provides:
//! - `Exporter` - Accepts records, routes them to destinations and finishes the run
//! - `ExportReport` - Final summary of a run
//! - `ExportStats` - Counters kept while records are submitted
//!
//! A run moves from `Accepting` to `Finishing` when `finish` is called, and
//! ends in `Done` after a successful job or `Failed` otherwise. A failed job
//! still stages every buffered record but never creates, populates or clears.

mod types;

pub use types::{ExportReport, ExportStats, MAX_REJECTIONS};

use crate::config::{ExportSettings, ExporterConfig};
use crate::database::{DuckdbWarehouse, Warehouse};
use crate::destination::{DestinationManager, ExportContext};
use crate::error::{Error, Result};
use crate::stage::{ObjectStage, StageUploader};
use crate::template::RecordVariables;
use crate::types::{CancelHandle, JobOutcome, JsonObject, JsonValue, RunState};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Routes records to per-destination managers and drives the run lifecycle
pub struct Exporter {
    /// Shared run context
    context: Arc<ExportContext>,
    /// Managers in first-seen order
    managers: Vec<DestinationManager>,
    /// Destination path to manager index
    index: HashMap<String, usize>,
    /// Lifecycle state
    state: RunState,
    /// Statistics
    stats: ExportStats,
    /// Run start
    started: Instant,
}

impl Exporter {
    /// Create an exporter over a stage and a warehouse
    pub fn new(
        settings: ExportSettings,
        stage: Arc<dyn StageUploader>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        let context = ExportContext::new(settings, stage, warehouse);
        debug!("Starting export run {} ({})", context.instance_ms, context.date);

        Self {
            context: Arc::new(context),
            managers: Vec::new(),
            index: HashMap::new(),
            state: RunState::Accepting,
            stats: ExportStats::new(),
            started: Instant::now(),
        }
    }

    /// Create an exporter with the object stage and DuckDB warehouse of a configuration
    pub fn from_config(config: &ExporterConfig) -> Result<Self> {
        let settings = config.settings()?;
        let stage = Arc::new(ObjectStage::parse(&config.stage.url)?);
        let warehouse =
            DuckdbWarehouse::open(config.warehouse.database.as_deref(), stage.clone())?;

        info!(
            "Staging to {} ({}), loading into {:?}",
            config.stage.url,
            stage.scheme(),
            warehouse
        );

        Ok(Self::new(settings, stage, Arc::new(warehouse)))
    }

    /// Current lifecycle state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Statistics so far
    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Handle to cancel the remaining load steps of the run
    pub fn cancel_handle(&self) -> CancelHandle {
        self.context.cancel.clone()
    }

    /// Destinations seen so far, in first-seen order
    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.managers.iter().map(DestinationManager::destination)
    }

    /// Submit one record with its extra template variables
    ///
    /// Returns the resolved destination. A record whose destination cannot be
    /// resolved is rejected and counted; the run goes on.
    pub async fn submit_record(
        &mut self,
        record: JsonObject,
        extra: &JsonObject,
    ) -> Result<String> {
        if self.state != RunState::Accepting {
            return Err(Error::AlreadyFinished);
        }

        let item = JsonValue::Object(record);
        let destination = match self.resolve_destination(&item, extra) {
            Ok(destination) => destination,
            Err(e) => {
                debug!("Rejected record: {e}");
                self.stats.add_rejected(e.to_string());
                return Err(e);
            }
        };

        let JsonValue::Object(fields) = &item else {
            return Err(Error::invalid_record("record must be an object"));
        };
        let line = serde_json::to_vec(&item)?;

        let idx = self.manager_index(&destination);
        if let Err(e) = self.managers[idx].append(fields, &line).await {
            self.stats.add_rejected(e.to_string());
            return Err(e);
        }

        self.stats.add_accepted();
        Ok(destination)
    }

    /// Finish the run with the outcome of the job that fed it
    ///
    /// Every buffer is staged whatever the outcome. Create, populate and
    /// clear steps only run after a successful job that was not cancelled.
    pub async fn finish(&mut self, outcome: JobOutcome) -> Result<ExportReport> {
        if self.state != RunState::Accepting {
            return Err(Error::AlreadyFinished);
        }
        self.state = RunState::Finishing;

        let load = outcome.is_success();
        info!(
            "Finishing export: {} records across {} destinations",
            self.stats.records_accepted,
            self.managers.len()
        );

        let limit = self.context.settings.max_concurrent_flushes;
        futures::stream::iter(self.managers.iter_mut())
            .for_each_concurrent(limit, |manager| manager.flush(load))
            .await;

        match &outcome {
            JobOutcome::Success => {
                for manager in &mut self.managers {
                    manager.finalize().await;
                }
                self.state = RunState::Done;
            }
            JobOutcome::Failure(reason) => {
                warn!("Job failed ({reason}), skipping create, populate and clear");
                if self.context.settings.has_load_steps() {
                    for manager in &mut self.managers {
                        manager.skip(format!("job failed: {reason}"));
                    }
                }
                self.state = RunState::Failed;
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        self.stats.set_duration(self.started.elapsed().as_millis() as u64);

        let report = ExportReport {
            outcome,
            state: self.state,
            records_accepted: self.stats.records_accepted,
            records_rejected: self.stats.records_rejected,
            rejections: self.stats.rejections.clone(),
            destinations: self.managers.iter().map(DestinationManager::report).collect(),
            duration_ms: self.stats.duration_ms,
        };

        info!(
            "Export finished in {}ms: {} destinations, {} failed",
            report.duration_ms,
            report.destinations.len(),
            report.failed_destinations().count()
        );
        Ok(report)
    }

    fn resolve_destination(&self, item: &JsonValue, extra: &JsonObject) -> Result<String> {
        let vars = RecordVariables::new(item, extra);
        let destination = self.context.settings.destination_path.resolve(&vars)?;
        if destination.is_empty() {
            return Err(Error::invalid_record(format!(
                "destination path '{}' resolved to an empty string",
                self.context.settings.destination_path
            )));
        }
        Ok(destination)
    }

    fn manager_index(&mut self, destination: &str) -> usize {
        if let Some(&idx) = self.index.get(destination) {
            return idx;
        }

        info!("New destination {destination:?}");
        let idx = self.managers.len();
        self.managers
            .push(DestinationManager::new(destination, Arc::clone(&self.context)));
        self.index.insert(destination.to_string(), idx);
        idx
    }
}

impl std::fmt::Debug for Exporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exporter")
            .field("state", &self.state)
            .field("managers", &self.managers)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
