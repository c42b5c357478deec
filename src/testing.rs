//! In-memory stage and warehouse used by unit tests

use crate::config::{ExportSettings, ExporterConfig};
use crate::database::Warehouse;
use crate::destination::ExportContext;
use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::stage::{RetryPolicy, StageUploader, StagedUnit};
use crate::types::BackoffType;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// A warehouse call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        destination: String,
        columns: Vec<String>,
    },
    Populate {
        destination: String,
        columns: Vec<String>,
        units: Vec<String>,
    },
    Remove {
        remote_path: String,
    },
}

/// Warehouse recording every call, optionally failing some destinations
#[derive(Debug, Default)]
pub struct RecordingWarehouse {
    calls: Mutex<Vec<Call>>,
    fail_create: HashSet<String>,
    fail_populate: HashSet<String>,
}

impl RecordingWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create(mut self, destination: &str) -> Self {
        self.fail_create.insert(destination.to_string());
        self
    }

    pub fn failing_populate(mut self, destination: &str) -> Self {
        self.fail_populate.insert(destination.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls concerning `destination`, removals included
    pub fn calls_for(&self, destination: &str) -> Vec<Call> {
        let prefix = format!("{destination}/");
        self.calls()
            .into_iter()
            .filter(|call| match call {
                Call::Create { destination: d, .. } | Call::Populate { destination: d, .. } => {
                    d == destination
                }
                Call::Remove { remote_path } => remote_path.starts_with(&prefix),
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn column_names(schema: &TableSchema) -> Vec<String> {
    schema.names().map(str::to_string).collect()
}

#[async_trait]
impl Warehouse for RecordingWarehouse {
    async fn create_table(&self, destination: &str, schema: &TableSchema) -> Result<()> {
        self.record(Call::Create {
            destination: destination.to_string(),
            columns: column_names(schema),
        });
        if self.fail_create.contains(destination) {
            return Err(Error::database("permission denied"));
        }
        Ok(())
    }

    async fn populate_table(
        &self,
        destination: &str,
        schema: &TableSchema,
        units: &[StagedUnit],
    ) -> Result<()> {
        self.record(Call::Populate {
            destination: destination.to_string(),
            columns: column_names(schema),
            units: units.iter().map(|unit| unit.remote_path.clone()).collect(),
        });
        if self.fail_populate.contains(destination) {
            return Err(Error::database("load failed"));
        }
        Ok(())
    }

    async fn remove_staged_unit(&self, unit: &StagedUnit) -> Result<()> {
        self.record(Call::Remove {
            remote_path: unit.remote_path.clone(),
        });
        Ok(())
    }
}

/// Stage keeping uploaded files in memory
#[derive(Debug, Default)]
pub struct MemoryStage {
    files: Mutex<BTreeMap<String, String>>,
    failures: AtomicU32,
}

impl MemoryStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` uploads
    pub fn failing(count: u32) -> Self {
        Self {
            failures: AtomicU32::new(count),
            ..Default::default()
        }
    }

    pub fn files(&self) -> BTreeMap<String, String> {
        self.files.lock().unwrap().clone()
    }
}

#[async_trait]
impl StageUploader for MemoryStage {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<String> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::upload(remote_path, "connection reset"));
        }

        let content = std::fs::read_to_string(local_path)?;
        self.files
            .lock()
            .unwrap()
            .insert(remote_path.to_string(), content);
        Ok(remote_path.to_string())
    }
}

/// Configuration with a static destination, no retries and a small buffer
pub fn config(destination_path: &str, max_buffer_bytes: u64) -> ExporterConfig {
    let mut config = ExporterConfig::new(destination_path);
    config.stage.path = "{{ destination }}/{{ batch }}.jl".to_string();
    config.max_buffer_bytes = max_buffer_bytes;
    config.upload_retry = RetryPolicy {
        max_retries: 0,
        initial_backoff_ms: 1,
        max_backoff_ms: 1,
        backoff: BackoffType::Constant,
    };
    config
}

pub fn settings(config: &ExporterConfig) -> ExportSettings {
    config.settings().unwrap()
}

pub fn context(
    config: &ExporterConfig,
    stage: Arc<MemoryStage>,
    warehouse: Arc<RecordingWarehouse>,
) -> Arc<ExportContext> {
    Arc::new(ExportContext::new(settings(config), stage, warehouse))
}
