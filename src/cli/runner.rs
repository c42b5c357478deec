//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::{load_config, ExportSettings};
use crate::engine::Exporter;
use crate::error::{Error, Result, ResultExt};
use crate::schema::SchemaTracker;
use crate::template::RecordVariables;
use crate::types::{JobOutcome, JsonObject, JsonValue, RunState};
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tracing::{debug, info, warn};

type InputLines = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Export {
                config,
                input,
                job,
                vars,
            } => {
                self.export(config, input.as_deref(), job.as_deref(), vars)
                    .await
            }
            Commands::Infer {
                config,
                input,
                vars,
            } => self.infer(config, input.as_deref(), vars).await,
            Commands::Validate { config } => self.validate(config),
        }
    }

    /// Stage and load every record of the input
    async fn export(
        &self,
        config_path: &Path,
        input: Option<&Path>,
        job: Option<&str>,
        vars: &[(String, String)],
    ) -> Result<()> {
        let mut config = load_config(config_path)?;
        if let Some(job) = job {
            config.job = job.to_string();
        }
        let extra = build_variables(vars);
        let mut exporter = Exporter::from_config(&config)?;
        let mut lines = open_input(input).await?;
        let mut skipped_lines = 0_u64;

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let outcome = loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    warn!("Interrupted while reading input");
                    break JobOutcome::failure("interrupted");
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let Some(record) = parse_line(&line) else {
                            skipped_lines += 1;
                            continue;
                        };
                        if let Err(e) = exporter.submit_record(record, &extra).await {
                            warn!("Record not exported: {e}");
                        }
                    }
                    Ok(None) => break JobOutcome::Success,
                    Err(e) => break JobOutcome::failure(format!("failed to read input: {e}")),
                },
            }
        };

        if skipped_lines > 0 {
            warn!("Skipped {skipped_lines} lines that are not JSON objects");
        }

        // A second Ctrl-C while finishing only skips the remaining load steps
        let cancel = exporter.cancel_handle();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling remaining load steps");
                cancel.cancel();
            }
        });
        let report = exporter.finish(outcome).await;
        watcher.abort();
        let report = report?;

        self.output_message(&serde_json::to_value(&report)?);

        if report.state == RunState::Failed {
            return Err(Error::Other(format!(
                "Job failed, {} destinations left staged",
                report.destinations.len()
            )));
        }
        report.into_result().map(|_| ())
    }

    /// Route records and infer their schemas without staging
    async fn infer(
        &self,
        config_path: &Path,
        input: Option<&Path>,
        vars: &[(String, String)],
    ) -> Result<()> {
        let config = load_config(config_path)?;
        let settings = config.settings()?;
        let extra = build_variables(vars);
        let mut lines = open_input(input).await?;

        let mut dry_run = DryRun::new(&settings);
        while let Some(line) = lines.next_line().await? {
            let Some(record) = parse_line(&line) else {
                continue;
            };
            dry_run.observe(record, &extra);
        }

        info!(
            "Inferred {} destinations from {} records ({} rejected)",
            dry_run.destinations.len(),
            dry_run.records,
            dry_run.rejected
        );

        for (destination, tracker, rows) in &dry_run.destinations {
            let decisions = tracker.decisions().map(|decisions| {
                decisions
                    .iter()
                    .map(|(name, decision)| {
                        json!({"column": name, "decision": decision.to_string()})
                    })
                    .collect::<Vec<_>>()
            });
            let schema = tracker.materialize(destination, settings.skip_unresolved_columns);

            let mut message = json!({
                "type": "DESTINATION",
                "destination": destination,
                "rows": rows,
                "predefined": tracker.is_predefined(),
                "decisions": decisions,
            });
            match schema {
                Ok(schema) => message["schema"] = serde_json::to_value(&schema)?,
                Err(e) => message["error"] = JsonValue::String(e.to_string()),
            }
            self.output_message(&message);
        }

        Ok(())
    }

    /// Validate the exporter configuration
    fn validate(&self, config_path: &Path) -> Result<()> {
        let config = load_config(config_path)?;

        self.output_message(&json!({
            "type": "LOG",
            "log": {
                "level": "INFO",
                "message": format!(
                    "Configuration '{}' is valid: destination '{}', stage '{}'",
                    config_path.display(),
                    config.destination_path,
                    config.stage.url
                )
            }
        }));

        Ok(())
    }

    /// Output a message in the selected format
    fn output_message(&self, msg: &JsonValue) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// Routing and inference state of a dry run
struct DryRun<'a> {
    settings: &'a ExportSettings,
    /// Destination, tracker and row count, in first-seen order
    destinations: Vec<(String, SchemaTracker, u64)>,
    index: HashMap<String, usize>,
    records: u64,
    rejected: u64,
}

impl<'a> DryRun<'a> {
    fn new(settings: &'a ExportSettings) -> Self {
        Self {
            settings,
            destinations: Vec::new(),
            index: HashMap::new(),
            records: 0,
            rejected: 0,
        }
    }

    fn observe(&mut self, record: JsonObject, extra: &JsonObject) {
        self.records += 1;
        let item = JsonValue::Object(record);
        let destination = match self
            .settings
            .destination_path
            .resolve(&RecordVariables::new(&item, extra))
        {
            Ok(destination) if !destination.is_empty() => destination,
            Ok(_) => {
                debug!("Record resolved to an empty destination");
                self.rejected += 1;
                return;
            }
            Err(e) => {
                debug!("Rejected record: {e}");
                self.rejected += 1;
                return;
            }
        };

        let idx = match self.index.get(&destination) {
            Some(&idx) => idx,
            None => {
                let tracker = self.settings.schema_tracker(&destination);
                self.destinations.push((destination.clone(), tracker, 0));
                self.index.insert(destination, self.destinations.len() - 1);
                self.destinations.len() - 1
            }
        };

        if let JsonValue::Object(fields) = &item {
            let (_, tracker, rows) = &mut self.destinations[idx];
            tracker.observe(fields);
            *rows += 1;
        }
    }
}

/// Build extra template variables from `key=value` pairs
///
/// Values that parse as JSON keep their type, anything else is a string.
fn build_variables(vars: &[(String, String)]) -> JsonObject {
    vars.iter()
        .map(|(key, value)| {
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| JsonValue::String(value.clone()));
            (key.clone(), value)
        })
        .collect()
}

/// Parse one input line into a record, skipping blank and non-object lines
fn parse_line(line: &str) -> Option<JsonObject> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<JsonValue>(line) {
        Ok(JsonValue::Object(record)) => Some(record),
        Ok(_) => {
            warn!("Skipping line that is not a JSON object");
            None
        }
        Err(e) => {
            warn!("Skipping invalid JSON line: {e}");
            None
        }
    }
}

/// Open the input file, or stdin when no file is given
async fn open_input(input: Option<&Path>) -> Result<InputLines> {
    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input '{}'", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    Ok(BufReader::new(reader).lines())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::schema::ColumnType;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_variables() {
        let vars = vec![
            ("source".to_string(), "crm".to_string()),
            ("day".to_string(), "3".to_string()),
            ("flags".to_string(), "[1, 2]".to_string()),
        ];

        let extra = build_variables(&vars);
        assert_eq!(extra["source"], json!("crm"));
        assert_eq!(extra["day"], json!(3));
        assert_eq!(extra["flags"], json!([1, 2]));
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line(r#"{"id": 1}"#).unwrap().get("id"),
            Some(&json!(1))
        );
        assert!(parse_line("   ").is_none());
        assert!(parse_line("[1, 2]").is_none());
        assert!(parse_line("{not json").is_none());
    }

    #[test]
    fn test_dry_run_routes_and_infers() {
        let config = load_config_from_str(
            r#"
destination_path: "{{ source }}.{{ item.kind }}"
predefined_column_types:
  crm.fixed:
    id: BIGINT
"#,
        )
        .unwrap();
        let settings = config.settings().unwrap();
        let extra = build_variables(&[("source".to_string(), "crm".to_string())]);

        let mut dry_run = DryRun::new(&settings);
        for line in [
            r#"{"kind": "users", "id": 1, "name": "a"}"#,
            r#"{"kind": "users", "id": 2.5}"#,
            r#"{"kind": "fixed", "id": 3}"#,
            r#"{"id": 4}"#,
        ] {
            dry_run.observe(parse_line(line).unwrap(), &extra);
        }

        assert_eq!(dry_run.records, 4);
        assert_eq!(dry_run.rejected, 1);
        assert_eq!(dry_run.destinations.len(), 2);

        let (destination, tracker, rows) = &dry_run.destinations[0];
        assert_eq!(destination, "crm.users");
        assert_eq!(*rows, 2);
        let schema = tracker.materialize(destination, true).unwrap();
        assert_eq!(schema.column("id").unwrap().column_type, ColumnType::Float);

        let (destination, tracker, _) = &dry_run.destinations[1];
        assert_eq!(destination, "crm.fixed");
        assert!(tracker.is_predefined());
    }
}
