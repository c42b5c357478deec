//! Tests for destination module

use super::*;
use crate::schema::{Column, ColumnType, TableSchema};
use crate::testing::{self, Call, MemoryStage, RecordingWarehouse};
use crate::types::{JsonObject, JsonValue, TriggerPolicy};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn record(value: JsonValue) -> (JsonObject, Vec<u8>) {
    let line = serde_json::to_vec(&value).unwrap();
    match value {
        JsonValue::Object(map) => (map, line),
        _ => panic!("expected object"),
    }
}

async fn append(manager: &mut DestinationManager, value: JsonValue) {
    let (record, line) = record(value);
    manager.append(&record, &line).await.unwrap();
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Buffering and Staging Tests
// ============================================================================

#[tokio::test]
async fn test_oversized_record_is_staged_immediately() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let config = testing::config("T", 10);
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage.clone(), warehouse));

    // 15 bytes, over the 10 byte threshold
    append(&mut manager, json!({"k": "0123456"})).await;

    let units = manager.staged_units();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].batch, 0);
    assert_eq!(units[0].rows, 1);
    assert_eq!(units[0].bytes, 16);
    assert_eq!(units[0].remote_path, "T/0.jl");
    assert_eq!(stage.files()["T/0.jl"], "{\"k\":\"0123456\"}\n");

    // The next record goes to batch 1
    append(&mut manager, json!({"k": "x"})).await;
    manager.flush(true).await;
    assert_eq!(manager.staged_units()[1].remote_path, "T/1.jl");
}

#[test]
fn test_default_stage_path_is_scoped_by_job() {
    let mut config = testing::config("T", 1024);
    config.stage.path = crate::config::DEFAULT_STAGE_PATH.to_string();
    config.job = "crm_sync".to_string();
    let context = testing::context(
        &config,
        Arc::new(MemoryStage::new()),
        Arc::new(RecordingWarehouse::new()),
    );

    assert_eq!(
        context.stage_path("RAW.users", 3).unwrap(),
        format!("RAW.users/crm_sync/{}_3.jl", context.instance_ms)
    );

    // Another job started at the same instant stages elsewhere
    let mut other = config.clone();
    other.job = "billing".to_string();
    let other = testing::context(
        &other,
        Arc::new(MemoryStage::new()),
        Arc::new(RecordingWarehouse::new()),
    );
    assert_ne!(
        other.stage_path("RAW.users", 3).unwrap(),
        format!("RAW.users/crm_sync/{}_3.jl", other.instance_ms)
    );
}

#[tokio::test]
async fn test_unwritten_record_is_not_observed() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1024);
    config.buffer_dir = Some(std::path::PathBuf::from("/nonexistent/stage-exporter"));
    let mut manager = DestinationManager::new("T", testing::context(&config, stage, warehouse));

    let (record, line) = record(json!({"id": 1}));
    assert!(manager.append(&record, &line).await.is_err());

    assert_eq!(manager.rows(), 0);
    assert_eq!(manager.tracker().decisions(), Some(Vec::new()));
}

#[tokio::test]
async fn test_flush_stages_partial_buffer() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let config = testing::config("EMPLOYEE", 1024);
    let mut manager =
        DestinationManager::new("EMPLOYEE", testing::context(&config, stage.clone(), warehouse));

    append(&mut manager, json!({"name": "Jack", "salary": 100})).await;
    append(&mut manager, json!({"name": "Sal", "salary": 90, "extra_info": {"age": 20}})).await;
    assert!(manager.staged_units().is_empty());

    manager.flush(true).await;
    assert_eq!(manager.staged_units().len(), 1);
    assert_eq!(manager.staged_units()[0].rows, 2);
    assert_eq!(manager.rows(), 2);

    // Nothing left to stage
    manager.flush(true).await;
    assert_eq!(manager.staged_units().len(), 1);
    assert_eq!(stage.files().len(), 1);
}

#[tokio::test]
async fn test_failed_upload_is_retried_on_flush() {
    let stage = Arc::new(MemoryStage::failing(1));
    let warehouse = Arc::new(RecordingWarehouse::new());
    let config = testing::config("T", 5);
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage.clone(), warehouse));

    append(&mut manager, json!({"id": 1})).await;
    assert!(manager.staged_units().is_empty());

    manager.flush(true).await;
    let report = manager.report();
    assert_eq!(report.staged_units.len(), 1);
    assert_eq!(report.staged_units[0].batch, 0);
    assert!(report.errors.is_empty());
    assert!(report.unstaged_files.is_empty());
}

#[tokio::test]
async fn test_unstageable_buffer_is_kept_on_disk() {
    let stage = Arc::new(MemoryStage::failing(u32::MAX));
    let warehouse = Arc::new(RecordingWarehouse::new());
    let config = testing::config("T", 5);
    let mut manager = DestinationManager::new("T", testing::context(&config, stage, warehouse));

    append(&mut manager, json!({"id": 1})).await;
    manager.flush(true).await;

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Failed);
    // Retried once more on flush, then kept
    assert_eq!(report.unstaged_files.len(), 1);
    let kept = &report.unstaged_files[0];
    assert_eq!(std::fs::read_to_string(kept).unwrap(), "{\"id\":1}\n");
    std::fs::remove_file(kept).unwrap();
}

// ============================================================================
// On Flush Steps Tests
// ============================================================================

#[tokio::test]
async fn test_create_once_populate_each_flush() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 5);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;
    append(&mut manager, json!({"id": 2})).await;
    manager.flush(true).await;
    manager.finalize().await;

    assert_eq!(
        warehouse.calls(),
        vec![
            Call::Create {
                destination: "T".to_string(),
                columns: strings(&["id"]),
            },
            Call::Populate {
                destination: "T".to_string(),
                columns: strings(&["id"]),
                units: strings(&["T/0.jl"]),
            },
            Call::Populate {
                destination: "T".to_string(),
                columns: strings(&["id"]),
                units: strings(&["T/1.jl"]),
            },
        ]
    );

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Loaded);
    assert!(report.created);
    assert_eq!(report.populated_units, 2);
}

#[tokio::test]
async fn test_clear_on_flush_follows_populate() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 5);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    config.clear_stage_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;

    let calls = warehouse.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[2],
        Call::Remove {
            remote_path: "T/0.jl".to_string()
        }
    );
}

#[tokio::test]
async fn test_schema_is_frozen_at_creation() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 5);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"a": 1})).await;
    append(&mut manager, json!({"a": 2, "b": "new"})).await;

    for call in warehouse.calls() {
        match call {
            Call::Create { columns, .. } | Call::Populate { columns, .. } => {
                assert_eq!(columns, strings(&["a"]));
            }
            Call::Remove { .. } => panic!("unexpected removal"),
        }
    }
}

#[tokio::test]
async fn test_conflicting_column_is_left_out_of_later_loads() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"a": 1, "b": 1})).await;
    append(&mut manager, json!({"a": 2, "b": "x"})).await;

    assert_eq!(
        warehouse.calls(),
        vec![
            Call::Create {
                destination: "T".to_string(),
                columns: strings(&["a", "b"]),
            },
            Call::Populate {
                destination: "T".to_string(),
                columns: strings(&["a", "b"]),
                units: strings(&["T/0.jl"]),
            },
            Call::Populate {
                destination: "T".to_string(),
                columns: strings(&["a"]),
                units: strings(&["T/1.jl"]),
            },
        ]
    );

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Loaded);
    assert_eq!(report.populated_units, 2);
    assert_eq!(
        report.skipped,
        vec!["column 'b' not loaded: its type changed after the table was created".to_string()]
    );
}

#[tokio::test]
async fn test_integer_column_is_not_loaded_with_floats() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1, "salary": 100})).await;
    append(&mut manager, json!({"id": 2, "salary": 90.7})).await;

    let calls = warehouse.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[2],
        Call::Populate {
            destination: "T".to_string(),
            columns: strings(&["id"]),
            units: strings(&["T/1.jl"]),
        }
    );
}

#[tokio::test]
async fn test_changed_column_fails_load_without_skipping() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    config.clear_stage_on = TriggerPolicy::OnFinish;
    config.skip_unresolved_columns = false;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1, "salary": 100})).await;
    append(&mut manager, json!({"id": 2, "salary": 90.7})).await;
    manager.finalize().await;

    // Create and the first populate only, nothing cleared
    assert_eq!(warehouse.calls().len(), 2);

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Failed);
    assert_eq!(report.populated_units, 1);
    assert_eq!(
        report.errors,
        vec![
            "populate table failed for 'T': Destination 'T': conflicting value types for columns [\"salary\"]"
                .to_string()
        ]
    );
    assert_eq!(
        report.skipped,
        vec!["clear skipped: populate failed".to_string()]
    );
}

#[tokio::test]
async fn test_failed_create_skips_populate() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new().failing_create("T"));
    let mut config = testing::config("T", 5);
    config.create_on = TriggerPolicy::OnFlush;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;

    assert!(!warehouse
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Populate { .. })));

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Failed);
    assert_eq!(
        report.errors,
        vec!["create table failed for 'T': Database error: permission denied".to_string()]
    );
    assert_eq!(
        report.skipped,
        vec!["populate skipped: table was not created".to_string()]
    );
}

#[tokio::test]
async fn test_populate_without_create_when_create_is_never() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 5);
    config.create_on = TriggerPolicy::Never;
    config.populate_on = TriggerPolicy::OnFlush;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;

    assert!(matches!(
        warehouse.calls().as_slice(),
        [Call::Populate { .. }]
    ));
    assert!(!manager.report().created);
}

// ============================================================================
// On Finish Steps Tests
// ============================================================================

#[tokio::test]
async fn test_finalize_loads_all_units() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("EMPLOYEE", 20);
    config.clear_stage_on = TriggerPolicy::OnFinish;
    let mut manager =
        DestinationManager::new("EMPLOYEE", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"name": "Jack", "salary": 100})).await;
    append(&mut manager, json!({"name": "Sal", "salary": 90, "extra_info": {"age": 20}})).await;
    // Nothing happens on flush with the default triggers
    assert!(warehouse.calls().is_empty());

    manager.flush(true).await;
    manager.finalize().await;

    let columns = strings(&["name", "salary", "extra_info"]);
    assert_eq!(
        warehouse.calls(),
        vec![
            Call::Create {
                destination: "EMPLOYEE".to_string(),
                columns: columns.clone(),
            },
            Call::Populate {
                destination: "EMPLOYEE".to_string(),
                columns,
                units: strings(&["EMPLOYEE/0.jl", "EMPLOYEE/1.jl"]),
            },
            Call::Remove {
                remote_path: "EMPLOYEE/0.jl".to_string()
            },
            Call::Remove {
                remote_path: "EMPLOYEE/1.jl".to_string()
            },
        ]
    );
    assert_eq!(manager.report().status, DestinationStatus::Loaded);
}

#[tokio::test]
async fn test_failed_populate_skips_clear() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new().failing_populate("T"));
    let mut config = testing::config("T", 1024);
    config.clear_stage_on = TriggerPolicy::OnFinish;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;
    manager.flush(true).await;
    manager.finalize().await;

    assert!(!warehouse
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Remove { .. })));

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Failed);
    assert_eq!(report.skipped, vec!["clear skipped: populate failed".to_string()]);
}

#[tokio::test]
async fn test_clear_without_populate() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1024);
    config.create_on = TriggerPolicy::Never;
    config.populate_on = TriggerPolicy::Never;
    config.clear_stage_on = TriggerPolicy::OnFinish;
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));

    append(&mut manager, json!({"id": 1})).await;
    manager.flush(true).await;
    manager.finalize().await;

    assert_eq!(
        warehouse.calls(),
        vec![Call::Remove {
            remote_path: "T/0.jl".to_string()
        }]
    );
    assert_eq!(manager.report().status, DestinationStatus::Staged);
}

#[tokio::test]
async fn test_cancelled_run_skips_load_steps() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let config = testing::config("T", 1024);
    let context = testing::context(&config, stage.clone(), warehouse.clone());
    let mut manager = DestinationManager::new("T", context.clone());

    append(&mut manager, json!({"id": 1})).await;
    context.cancel.cancel();
    manager.flush(true).await;
    manager.finalize().await;

    assert!(warehouse.calls().is_empty());
    assert_eq!(stage.files().len(), 1);

    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Staged);
    assert_eq!(report.skipped, vec!["cancelled".to_string()]);
}

#[tokio::test]
async fn test_predefined_columns_reject_unexpected_fields() {
    let stage = Arc::new(MemoryStage::new());
    let warehouse = Arc::new(RecordingWarehouse::new());
    let mut config = testing::config("T", 1024);
    config.ignore_unexpected_fields = false;
    config.predefined_column_types.insert(
        "T".to_string(),
        TableSchema::new(vec![Column::new("id", ColumnType::Integer)]),
    );
    let mut manager =
        DestinationManager::new("T", testing::context(&config, stage, warehouse.clone()));
    assert!(manager.tracker().is_predefined());

    append(&mut manager, json!({"id": 1, "note": "x"})).await;
    manager.flush(true).await;
    manager.finalize().await;

    assert!(warehouse.calls().is_empty());
    let report = manager.report();
    assert_eq!(report.status, DestinationStatus::Failed);
    assert!(report.errors[0].starts_with("create table failed for 'T'"));
    assert!(report.errors[0].contains("note"));
}
