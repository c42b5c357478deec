//! Per-destination buffering, staging and loading

use super::context::ExportContext;
use super::types::{DestinationReport, DestinationStatus};
use crate::buffer::{Buffer, StagedUnitDraft};
use crate::error::{Error, Result};
use crate::schema::{Column, SchemaTracker, TableSchema};
use crate::stage::{upload_with_retry, StagedUnit};
use crate::types::{JsonObject, TriggerPolicy};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Buffers, stages and loads the records of one destination
pub struct DestinationManager {
    /// Resolved destination path
    destination: String,
    /// Shared run context
    context: Arc<ExportContext>,
    /// Active buffer
    buffer: Buffer,
    /// Batch index of the next buffer
    next_batch: u64,
    /// Column discovery
    tracker: SchemaTracker,
    /// Uploaded units, in staging order
    staged: Vec<StagedUnit>,
    /// Sealed buffers whose upload failed
    pending: Vec<StagedUnitDraft>,
    /// Whether the table was created
    created: bool,
    /// Schema used for the table, frozen on first use
    table_schema: Option<TableSchema>,
    /// Remote paths of staged units loaded into the table
    populated: HashSet<String>,
    /// Whether any populate step failed
    populate_failed: bool,
    /// Remote paths of staged units removed from the stage
    removed: HashSet<String>,
    /// Records routed to this destination
    rows: u64,
    /// Steps skipped, with the reason
    skipped: Vec<String>,
    /// Recorded errors
    errors: Vec<String>,
    /// Local files kept after failed uploads
    unstaged_files: Vec<PathBuf>,
}

impl DestinationManager {
    /// Create a manager for a destination seen for the first time
    pub fn new(destination: impl Into<String>, context: Arc<ExportContext>) -> Self {
        let destination = destination.into();
        let settings = &context.settings;

        let tracker = settings.schema_tracker(&destination);
        if tracker.is_predefined() {
            debug!("Using predefined columns for {destination:?}");
        }

        let buffer = Buffer::new(
            destination.clone(),
            0,
            settings.max_buffer_bytes,
            settings.buffer_dir.clone(),
        );

        Self {
            destination,
            context,
            buffer,
            next_batch: 1,
            tracker,
            staged: Vec::new(),
            pending: Vec::new(),
            created: false,
            table_schema: None,
            populated: HashSet::new(),
            populate_failed: false,
            removed: HashSet::new(),
            rows: 0,
            skipped: Vec::new(),
            errors: Vec::new(),
            unstaged_files: Vec::new(),
        }
    }

    /// Resolved destination path
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Schema tracker of the destination
    pub fn tracker(&self) -> &SchemaTracker {
        &self.tracker
    }

    /// Units staged so far
    pub fn staged_units(&self) -> &[StagedUnit] {
        &self.staged
    }

    /// Records routed to this destination
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Append a record and its serialized line
    ///
    /// Fails only when the record could not be written to the buffer. Once
    /// written, the record is observed by the schema tracker before the buffer
    /// can roll over, so a flush triggered by this record already accounts for
    /// it. A buffer that cannot be sealed keeps its records and is sealed
    /// again on the next rollover or flush.
    pub async fn append(&mut self, record: &JsonObject, serialized: &[u8]) -> Result<()> {
        let full = self.buffer.append(serialized)?;
        self.tracker.observe(record);
        self.rows += 1;

        if full {
            debug!(
                "Buffer for {:?} (batch {}) reached {} bytes",
                self.destination,
                self.buffer.batch(),
                self.buffer.current_size()
            );
            if let Err(e) = self.rollover(true).await {
                warn!(
                    "Failed to seal buffer for {:?}, will retry on flush: {e}",
                    self.destination
                );
            }
        }
        Ok(())
    }

    /// Stage everything still held locally
    ///
    /// Retries the uploads that failed earlier, then seals and stages the
    /// active buffer if it holds records. With `load` set, the "on flush"
    /// steps run for every newly staged unit. Drafts that still cannot be
    /// uploaded are kept on disk and reported.
    pub async fn flush(&mut self, load: bool) {
        for draft in std::mem::take(&mut self.pending) {
            match self.upload(&draft).await {
                Ok(unit) => {
                    self.staged.push(unit.clone());
                    drop(draft);
                    if load {
                        self.run_flush_steps(&unit).await;
                    }
                }
                Err(e) => self.keep_unstaged(draft, e),
            }
        }

        if !self.buffer.is_empty() {
            if let Err(e) = self.rollover(load).await {
                self.record_error(Error::destination_op(
                    &self.destination,
                    "stage",
                    e.to_string(),
                ));
            }
        }
    }

    /// Run the "on finish" steps: create, populate every staged unit, clear the stage
    pub async fn finalize(&mut self) {
        let settings = &self.context.settings;
        let (create_on, populate_on, clear_stage_on) =
            (settings.create_on, settings.populate_on, settings.clear_stage_on);

        if self.context.is_cancelled() {
            if create_on.on_finish() || populate_on.on_finish() || clear_stage_on.on_finish() {
                self.skip("cancelled");
            }
            return;
        }

        if create_on.on_finish() && !self.created {
            self.create().await;
        }

        if populate_on.on_finish() {
            if self.can_populate(create_on) {
                let units: Vec<StagedUnit> = self
                    .staged
                    .iter()
                    .filter(|unit| !self.populated.contains(&unit.remote_path))
                    .cloned()
                    .collect();
                self.populate(&units).await;
            } else {
                self.skip("populate skipped: table was not created");
            }
        }

        if clear_stage_on.on_finish() {
            if self.populate_failed {
                self.skip("clear skipped: populate failed");
            } else {
                let units: Vec<StagedUnit> = self
                    .staged
                    .iter()
                    .filter(|unit| self.is_clearable(unit, populate_on))
                    .cloned()
                    .collect();
                for unit in &units {
                    self.remove(unit).await;
                }
            }
        }
    }

    /// Record why the load steps were skipped
    pub fn skip(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!("Destination {:?}: {reason}", self.destination);
        if !self.skipped.contains(&reason) {
            self.skipped.push(reason);
        }
    }

    /// Summarize the destination
    pub fn report(&self) -> DestinationReport {
        let status = if !self.errors.is_empty() {
            DestinationStatus::Failed
        } else if !self.staged.is_empty() && self.populated.len() == self.staged.len() {
            DestinationStatus::Loaded
        } else {
            DestinationStatus::Staged
        };

        DestinationReport {
            destination: self.destination.clone(),
            status,
            rows: self.rows,
            staged_units: self.staged.clone(),
            created: self.created,
            populated_units: self.populated.len(),
            skipped: self.skipped.clone(),
            errors: self.errors.clone(),
            unstaged_files: self.unstaged_files.clone(),
        }
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Seal the active buffer, start the next one and stage the sealed one
    async fn rollover(&mut self, load: bool) -> Result<()> {
        let draft = self.buffer.seal()?;
        self.buffer = Buffer::new(
            self.destination.clone(),
            self.next_batch,
            self.context.settings.max_buffer_bytes,
            self.context.settings.buffer_dir.clone(),
        );
        self.next_batch += 1;

        match self.upload(&draft).await {
            Ok(unit) => {
                self.staged.push(unit.clone());
                drop(draft);
                if load {
                    self.run_flush_steps(&unit).await;
                }
            }
            Err(e) => {
                warn!(
                    "Upload of batch {} for {:?} failed, will retry on finish: {e}",
                    draft.batch(),
                    self.destination
                );
                self.pending.push(draft);
            }
        }
        Ok(())
    }

    async fn upload(&self, draft: &StagedUnitDraft) -> Result<StagedUnit> {
        let remote_path = self.context.stage_path(&self.destination, draft.batch())?;
        let remote_path = upload_with_retry(
            self.context.stage.as_ref(),
            &self.context.settings.upload_retry,
            draft.local_path(),
            &remote_path,
        )
        .await?;

        info!(
            "Staged {} rows ({} bytes) for {:?} at {remote_path}",
            draft.rows(),
            draft.bytes(),
            self.destination
        );

        Ok(StagedUnit {
            destination: self.destination.clone(),
            batch: draft.batch(),
            remote_path,
            rows: draft.rows(),
            bytes: draft.bytes(),
        })
    }

    /// Give up on a draft, keeping its file for manual recovery
    fn keep_unstaged(&mut self, draft: StagedUnitDraft, e: Error) {
        self.record_error(Error::destination_op(
            &self.destination,
            "upload",
            format!("batch {}: {e}", draft.batch()),
        ));
        match draft.persist() {
            Ok(kept) => {
                warn!("Kept unstaged buffer for {:?} at {:?}", self.destination, kept);
                self.unstaged_files.push(kept);
            }
            Err(e) => self.record_error(Error::destination_op(
                &self.destination,
                "keep buffer",
                e.to_string(),
            )),
        }
    }

    // ========================================================================
    // Load Steps
    // ========================================================================

    /// Run the "on flush" steps for a newly staged unit
    async fn run_flush_steps(&mut self, unit: &StagedUnit) {
        let settings = &self.context.settings;
        let (create_on, populate_on, clear_stage_on) =
            (settings.create_on, settings.populate_on, settings.clear_stage_on);

        if !(create_on.on_flush() || populate_on.on_flush() || clear_stage_on.on_flush()) {
            return;
        }
        if self.context.is_cancelled() {
            self.skip("cancelled");
            return;
        }

        if create_on.on_flush() && !self.created {
            self.create().await;
        }

        if populate_on.on_flush() {
            if self.can_populate(create_on) {
                self.populate(std::slice::from_ref(unit)).await;
            } else {
                self.skip("populate skipped: table was not created");
            }
        }

        if clear_stage_on.on_flush() && self.is_clearable(unit, populate_on) {
            self.remove(unit).await;
        }
    }

    /// Tables are populated once created, or always when creation is left to others
    fn can_populate(&self, create_on: TriggerPolicy) -> bool {
        self.created || create_on == TriggerPolicy::Never
    }

    /// A unit may leave the stage once loaded, or whenever nothing loads it
    fn is_clearable(&self, unit: &StagedUnit, populate_on: TriggerPolicy) -> bool {
        !self.removed.contains(&unit.remote_path)
            && (populate_on == TriggerPolicy::Never || self.populated.contains(&unit.remote_path))
    }

    /// Schema the table is created and loaded with, frozen on first use
    fn table_schema(&mut self) -> Result<TableSchema> {
        if let Some(schema) = &self.table_schema {
            return Ok(schema.clone());
        }
        let schema = self.tracker.materialize(
            &self.destination,
            self.context.settings.skip_unresolved_columns,
        )?;
        self.table_schema = Some(schema.clone());
        Ok(schema)
    }

    /// Frozen schema without the columns whose type changed since it was fixed
    ///
    /// Drifted columns are left out of the load, or fail it when unresolved
    /// columns are not skipped. Values are never cast to the frozen type.
    fn load_schema(&mut self) -> Result<TableSchema> {
        let schema = self.table_schema()?;
        let drifted = self.tracker.drifted_columns(&schema);
        if drifted.is_empty() {
            return Ok(schema);
        }

        if !self.context.settings.skip_unresolved_columns {
            return Err(Error::SchemaConflict {
                destination: self.destination.clone(),
                columns: drifted,
            });
        }
        for name in &drifted {
            self.skip(format!(
                "column '{name}' not loaded: its type changed after the table was created"
            ));
        }

        let columns: Vec<Column> = schema
            .columns()
            .iter()
            .filter(|column| !drifted.contains(&column.name))
            .cloned()
            .collect();
        if columns.is_empty() {
            return Err(Error::NoColumns {
                destination: self.destination.clone(),
            });
        }
        Ok(TableSchema::new(columns))
    }

    async fn create(&mut self) {
        let result = match self.table_schema() {
            Ok(schema) => {
                self.context
                    .warehouse
                    .create_table(&self.destination, &schema)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.created = true,
            Err(e) => self.record_error(Error::destination_op(
                &self.destination,
                "create table",
                e.to_string(),
            )),
        }
    }

    async fn populate(&mut self, units: &[StagedUnit]) {
        if units.is_empty() {
            return;
        }

        let result = match self.load_schema() {
            Ok(schema) => {
                self.context
                    .warehouse
                    .populate_table(&self.destination, &schema, units)
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.populated
                    .extend(units.iter().map(|unit| unit.remote_path.clone()));
            }
            Err(e) => {
                self.populate_failed = true;
                self.record_error(Error::destination_op(
                    &self.destination,
                    "populate table",
                    e.to_string(),
                ));
            }
        }
    }

    async fn remove(&mut self, unit: &StagedUnit) {
        match self.context.warehouse.remove_staged_unit(unit).await {
            Ok(()) => {
                self.removed.insert(unit.remote_path.clone());
            }
            Err(e) => self.record_error(Error::destination_op(
                &self.destination,
                "clear stage",
                format!("{}: {e}", unit.remote_path),
            )),
        }
    }

    fn record_error(&mut self, e: Error) {
        error!("{e}");
        self.errors.push(e.to_string());
    }
}

impl std::fmt::Debug for DestinationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationManager")
            .field("destination", &self.destination)
            .field("rows", &self.rows)
            .field("batch", &self.buffer.batch())
            .field("staged", &self.staged.len())
            .field("pending", &self.pending.len())
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}
