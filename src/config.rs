//! Exporter configuration
//!
//! This module contains the configuration structures used to describe an
//! export in YAML format, their validation, and the compiled settings the
//! exporter runs with.

use crate::error::{Error, Result, ResultExt};
use crate::schema::{ConflictPolicy, SchemaTracker, TableSchema};
use crate::stage::RetryPolicy;
use crate::template::PathTemplate;
use crate::types::TriggerPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default stage path: one file per sealed buffer, grouped by destination and job
pub const DEFAULT_STAGE_PATH: &str =
    "{{ destination }}/{{ job }}/{{ instance_ms }}_{{ batch }}.jl";

/// Default job name
pub const DEFAULT_JOB: &str = "export";

/// Variables available to the stage path template
pub const STAGE_PATH_VARIABLES: [&str; 5] = ["destination", "job", "batch", "instance_ms", "date"];

// ============================================================================
// Top-Level Exporter Config
// ============================================================================

/// Complete exporter configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Destination path template, e.g. `RAW.{{ item.kind }}`
    pub destination_path: String,

    /// Name of the job feeding the exporter, available as `{{ job }}` in the stage path
    #[serde(default = "default_job")]
    pub job: String,

    /// Stage location
    #[serde(default)]
    pub stage: StageConfig,

    /// Size threshold of a buffer in bytes
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: u64,

    /// Directory for buffer files (system temp dir when unset)
    #[serde(default)]
    pub buffer_dir: Option<PathBuf>,

    /// Authoritative column types per destination
    #[serde(default)]
    pub predefined_column_types: HashMap<String, TableSchema>,

    /// Ignore fields missing from the predefined column types
    #[serde(default = "default_true")]
    pub ignore_unexpected_fields: bool,

    /// Widen conflicting columns to VARIANT instead of leaving them unresolved
    #[serde(default)]
    pub allow_varying_value_types: bool,

    /// Leave unresolved columns out of the table instead of failing the destination
    #[serde(default = "default_true")]
    pub skip_unresolved_columns: bool,

    /// When destination tables are created
    #[serde(default)]
    pub create_on: TriggerPolicy,

    /// When destination tables are populated
    #[serde(default)]
    pub populate_on: TriggerPolicy,

    /// When staged files are removed
    #[serde(default = "default_clear_stage_on")]
    pub clear_stage_on: TriggerPolicy,

    /// Upload retry settings
    #[serde(default)]
    pub upload_retry: RetryPolicy,

    /// Maximum number of destinations flushed at once when finishing
    #[serde(default = "default_max_concurrent_flushes")]
    pub max_concurrent_flushes: usize,

    /// Warehouse connection
    #[serde(default)]
    pub warehouse: WarehouseConfig,
}

fn default_job() -> String {
    DEFAULT_JOB.to_string()
}

fn default_max_buffer_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_clear_stage_on() -> TriggerPolicy {
    TriggerPolicy::Never
}

fn default_max_concurrent_flushes() -> usize {
    4
}

// ============================================================================
// Stage and Warehouse
// ============================================================================

/// Where sealed buffers are uploaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage URL (`s3://`, `r2://`, `gs://`, `az://` or a local directory)
    #[serde(default = "default_stage_url")]
    pub url: String,

    /// Path template of a staged file inside the stage
    #[serde(default = "default_stage_path")]
    pub path: String,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            url: default_stage_url(),
            path: default_stage_path(),
        }
    }
}

fn default_stage_url() -> String {
    "./stage".to_string()
}

fn default_stage_path() -> String {
    DEFAULT_STAGE_PATH.to_string()
}

/// Warehouse connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// DuckDB database file (in-memory when unset)
    #[serde(default)]
    pub database: Option<String>,
}

// ============================================================================
// Loading and Validation
// ============================================================================

/// Load an exporter configuration from a YAML file
pub fn load_config(path: impl AsRef<Path>) -> Result<ExporterConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    load_config_from_str(&content)
}

/// Load an exporter configuration from a YAML string
pub fn load_config_from_str(yaml: &str) -> Result<ExporterConfig> {
    let config: ExporterConfig =
        serde_yaml::from_str(yaml).context("Failed to parse config YAML")?;
    config.validate()?;
    Ok(config)
}

impl ExporterConfig {
    /// Create a configuration with defaults for everything but the destination path
    pub fn new(destination_path: impl Into<String>) -> Self {
        Self {
            destination_path: destination_path.into(),
            job: default_job(),
            stage: StageConfig::default(),
            max_buffer_bytes: default_max_buffer_bytes(),
            buffer_dir: None,
            predefined_column_types: HashMap::new(),
            ignore_unexpected_fields: true,
            allow_varying_value_types: false,
            skip_unresolved_columns: true,
            create_on: TriggerPolicy::OnFinish,
            populate_on: TriggerPolicy::OnFinish,
            clear_stage_on: default_clear_stage_on(),
            upload_retry: RetryPolicy::default(),
            max_concurrent_flushes: default_max_concurrent_flushes(),
            warehouse: WarehouseConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.settings().map(|_| ())
    }

    /// Compile the configuration into exporter settings
    pub fn settings(&self) -> Result<ExportSettings> {
        if self.destination_path.trim().is_empty() {
            return Err(Error::invalid_value("destination_path", "cannot be empty"));
        }
        let destination_path = PathTemplate::parse(&self.destination_path)?;

        if self.job.trim().is_empty() {
            return Err(Error::invalid_value("job", "cannot be empty"));
        }

        let stage_path = PathTemplate::parse(&self.stage.path)?;
        if let Some(unknown) = stage_path
            .placeholders()
            .map(|name| name.split('.').next().unwrap_or(name))
            .find(|root| !STAGE_PATH_VARIABLES.contains(root))
        {
            return Err(Error::invalid_value(
                "stage.path",
                format!(
                    "unknown variable '{unknown}', expected one of {}",
                    STAGE_PATH_VARIABLES.join(", ")
                ),
            ));
        }
        if !stage_path.placeholders().any(|name| name == "batch") {
            return Err(Error::invalid_value(
                "stage.path",
                "must contain {{ batch }}",
            ));
        }

        if self.max_buffer_bytes == 0 {
            return Err(Error::invalid_value(
                "max_buffer_bytes",
                "must be greater than 0",
            ));
        }

        if let Some((destination, _)) = self
            .predefined_column_types
            .iter()
            .find(|(_, schema)| schema.is_empty())
        {
            return Err(Error::invalid_value(
                "predefined_column_types",
                format!("no columns defined for '{destination}'"),
            ));
        }

        if self.populate_on.on_flush() && self.create_on.on_finish() {
            return Err(Error::invalid_value(
                "populate_on",
                "cannot populate on flush when tables are only created on finish",
            ));
        }

        if self.clear_stage_on.on_flush() && self.populate_on.on_finish() {
            return Err(Error::invalid_value(
                "clear_stage_on",
                "cannot clear the stage on flush when tables are only populated on finish",
            ));
        }

        if self.max_concurrent_flushes == 0 {
            return Err(Error::invalid_value(
                "max_concurrent_flushes",
                "must be greater than 0",
            ));
        }

        Ok(ExportSettings {
            destination_path,
            job: self.job.clone(),
            stage_path,
            max_buffer_bytes: self.max_buffer_bytes,
            buffer_dir: self.buffer_dir.clone(),
            predefined_column_types: self.predefined_column_types.clone(),
            ignore_unexpected_fields: self.ignore_unexpected_fields,
            conflict_policy: ConflictPolicy::from_allow_varying(self.allow_varying_value_types),
            skip_unresolved_columns: self.skip_unresolved_columns,
            create_on: self.create_on,
            populate_on: self.populate_on,
            clear_stage_on: self.clear_stage_on,
            upload_retry: self.upload_retry.clone(),
            max_concurrent_flushes: self.max_concurrent_flushes,
        })
    }
}

// ============================================================================
// Compiled Settings
// ============================================================================

/// Validated settings the exporter runs with
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Destination path template
    pub destination_path: PathTemplate,
    /// Job name
    pub job: String,
    /// Stage path template
    pub stage_path: PathTemplate,
    /// Size threshold of a buffer in bytes
    pub max_buffer_bytes: u64,
    /// Directory for buffer files
    pub buffer_dir: Option<PathBuf>,
    /// Authoritative column types per destination
    pub predefined_column_types: HashMap<String, TableSchema>,
    /// Ignore fields missing from the predefined column types
    pub ignore_unexpected_fields: bool,
    /// Conflict policy for inferred columns
    pub conflict_policy: ConflictPolicy,
    /// Leave unresolved columns out of the table
    pub skip_unresolved_columns: bool,
    /// When destination tables are created
    pub create_on: TriggerPolicy,
    /// When destination tables are populated
    pub populate_on: TriggerPolicy,
    /// When staged files are removed
    pub clear_stage_on: TriggerPolicy,
    /// Upload retry settings
    pub upload_retry: RetryPolicy,
    /// Maximum number of destinations flushed at once when finishing
    pub max_concurrent_flushes: usize,
}

impl ExportSettings {
    /// Check if any create, populate or clear step is configured
    pub fn has_load_steps(&self) -> bool {
        [self.create_on, self.populate_on, self.clear_stage_on]
            .iter()
            .any(|policy| *policy != TriggerPolicy::Never)
    }

    /// Schema tracker for a destination: its predefined columns, or inference
    pub fn schema_tracker(&self, destination: &str) -> SchemaTracker {
        match self.predefined_column_types.get(destination) {
            Some(schema) => {
                SchemaTracker::predefined(schema.clone(), self.ignore_unexpected_fields)
            }
            None => SchemaTracker::inferred(self.conflict_policy),
        }
    }
}
