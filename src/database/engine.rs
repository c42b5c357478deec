//! DuckDB-based warehouse
//!
//! Creates destination tables and loads staged newline-delimited JSON files
//! with `read_json`. Staged files are read in place from the stage, whether it
//! is a local directory or a cloud bucket.

use super::warehouse::Warehouse;
use crate::error::{Error, Result};
use crate::schema::{ColumnType, TableSchema};
use crate::stage::{ObjectStage, StagedUnit};
use async_trait::async_trait;
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Maximum number of staged files referenced by one load statement
pub const MAX_FILES_PER_LOAD: usize = 1000;

/// Warehouse backed by an embedded DuckDB database
pub struct DuckdbWarehouse {
    /// DuckDB connection
    conn: Mutex<Connection>,
    /// Stage the loaded files are read from
    stage: Arc<ObjectStage>,
    /// Database path (for logging)
    database: String,
}

impl DuckdbWarehouse {
    /// Open a DuckDB database reading staged files from `stage`
    ///
    /// `None` or `:memory:` opens an in-memory database.
    pub fn open(database: Option<&str>, stage: Arc<ObjectStage>) -> Result<Self> {
        let database = database.unwrap_or(":memory:").to_string();
        let conn = if database == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&database)
        }
        .map_err(|e| Error::config(format!("Failed to open DuckDB database {database}: {e}")))?;

        let warehouse = Self {
            conn: Mutex::new(conn),
            stage,
            database,
        };

        if warehouse.stage.is_cloud() {
            warehouse.configure_cloud_storage()?;
        }

        info!("Opened warehouse {}", warehouse.database);
        Ok(warehouse)
    }

    /// Configure cloud storage credentials (S3, R2, GCS, Azure)
    pub fn configure_cloud_storage(&self) -> Result<()> {
        let conn = self.lock()?;

        // Install and load httpfs for cloud storage
        conn.execute_batch("INSTALL httpfs; LOAD httpfs;")
            .map_err(|e| Error::config(format!("Failed to load httpfs extension: {e}")))?;

        // Configure S3 credentials from environment
        if let Ok(key_id) = std::env::var("AWS_ACCESS_KEY_ID") {
            if let Ok(secret) = std::env::var("AWS_SECRET_ACCESS_KEY") {
                let region =
                    std::env::var("AWS_DEFAULT_REGION").unwrap_or_else(|_| "us-east-1".to_string());

                conn.execute_batch(&format!(
                    "SET s3_access_key_id = '{key_id}'; SET s3_secret_access_key = '{secret}'; SET s3_region = '{region}';"
                ))
                .map_err(|e| Error::config(format!("Failed to configure S3: {e}")))?;

                // Custom endpoint (R2, MinIO, etc.)
                let endpoint = std::env::var("R2_ENDPOINT_URL")
                    .or_else(|_| std::env::var("AWS_ENDPOINT"));
                if let Ok(endpoint) = endpoint {
                    conn.execute_batch(&format!(
                        "SET s3_endpoint = '{}'; SET s3_url_style = 'path';",
                        endpoint
                            .trim_start_matches("https://")
                            .trim_start_matches("http://")
                    ))
                    .map_err(|e| Error::config(format!("Failed to configure S3 endpoint: {e}")))?;
                }
            }
        }

        // Configure GCS credentials
        if let Ok(service_account) = std::env::var("GOOGLE_SERVICE_ACCOUNT") {
            conn.execute_batch(&format!("SET gcs_credentials_file = '{service_account}';"))
                .map_err(|e| Error::config(format!("Failed to configure GCS: {e}")))?;
        }

        // Configure Azure credentials
        if let Ok(connection_string) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            conn.execute_batch(&format!(
                "INSTALL azure; LOAD azure; SET azure_storage_connection_string = '{connection_string}';"
            ))
            .map_err(|e| Error::config(format!("Failed to configure Azure: {e}")))?;
        }

        Ok(())
    }

    /// Count the rows of a table
    pub fn row_count(&self, table: &str) -> Result<u64> {
        let name = QualifiedName::parse(table)?;
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", name.quoted()), [], |row| {
                row.get(0)
            })
            .map_err(|e| Error::database(format!("Failed to count rows of {table}: {e}")))?;
        Ok(count as u64)
    }

    /// Count the rows of a table where `column` is null
    pub fn null_count(&self, table: &str, column: &str) -> Result<u64> {
        let name = QualifiedName::parse(table)?;
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
                    name.quoted(),
                    quote_ident(column)
                ),
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(format!("Failed to count nulls of {table}: {e}")))?;
        Ok(count as u64)
    }

    /// Columns of a table as `(name, type)` in declaration order
    pub fn table_columns(&self, table: &str) -> Result<Vec<(String, String)>> {
        let name = QualifiedName::parse(table)?;
        let conn = self.lock()?;

        let mut sql = "SELECT column_name, data_type FROM information_schema.columns \
                       WHERE table_name = ? AND table_schema = ?"
            .to_string();
        let schema = name.schema.clone().unwrap_or_else(|| "main".to_string());
        let mut params = vec![name.table.clone(), schema];
        if let Some(catalog) = &name.catalog {
            sql.push_str(" AND table_catalog = ?");
            params.push(catalog.clone());
        }
        sql.push_str(" ORDER BY ordinal_position");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::database(format!("Failed to prepare query: {e}")))?;

        let columns: Vec<(String, String)> = stmt
            .query_map(duckdb::params_from_iter(params.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(|e| Error::database(format!("Failed to query columns of {table}: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(columns)
    }

    /// Stage the loaded files are read from
    pub fn stage(&self) -> &ObjectStage {
        &self.stage
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::database("DuckDB connection lock poisoned"))
    }

    /// Attach the catalog of a three-part name unless it is attached already
    ///
    /// In-memory warehouses get in-memory catalogs. File databases get a
    /// `<catalog>.duckdb` file next to the main database.
    fn attach_catalog(&self, conn: &Connection, name: &QualifiedName) -> Result<()> {
        let Some(catalog) = &name.catalog else {
            return Ok(());
        };

        let target = if self.database == ":memory:" {
            ":memory:".to_string()
        } else {
            Path::new(&self.database)
                .with_file_name(format!("{catalog}.duckdb"))
                .to_string_lossy()
                .into_owned()
        };

        let sql = attach_sql(catalog, &target);
        debug!("Executing: {sql}");
        conn.execute_batch(&sql)
            .map_err(|e| Error::database(format!("Failed to attach catalog {catalog}: {e}")))
    }
}

#[async_trait]
impl Warehouse for DuckdbWarehouse {
    async fn create_table(&self, destination: &str, schema: &TableSchema) -> Result<()> {
        let name = QualifiedName::parse(destination)?;
        let sql = create_table_sql(&name, schema);
        debug!("Executing: {sql}");

        let conn = self.lock()?;
        self.attach_catalog(&conn, &name)?;
        conn.execute_batch(&sql)
            .map_err(|e| Error::database(format!("Failed to create table {destination}: {e}")))?;

        info!(
            "Created table {destination} with {} columns",
            schema.len()
        );
        Ok(())
    }

    async fn populate_table(
        &self,
        destination: &str,
        schema: &TableSchema,
        units: &[StagedUnit],
    ) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }

        let name = QualifiedName::parse(destination)?;
        let mut conn = self.lock()?;
        self.attach_catalog(&conn, &name)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::database(format!("Failed to begin transaction: {e}")))?;

        for chunk in units.chunks(MAX_FILES_PER_LOAD) {
            let files: Vec<String> = chunk
                .iter()
                .map(|unit| self.stage.location(&unit.remote_path))
                .collect();
            let sql = populate_sql(&name, schema, &files);
            debug!("Executing: {sql}");

            tx.execute_batch(&sql).map_err(|e| {
                Error::database(format!("Failed to populate table {destination}: {e}"))
            })?;
        }

        tx.commit()
            .map_err(|e| Error::database(format!("Failed to commit load of {destination}: {e}")))?;

        let rows: u64 = units.iter().map(|unit| unit.rows).sum();
        info!(
            "Populated table {destination} from {} staged files ({rows} rows)",
            units.len()
        );
        Ok(())
    }

    async fn remove_staged_unit(&self, unit: &StagedUnit) -> Result<()> {
        self.stage.delete(&unit.remote_path).await?;
        info!("Removed staged file {}", unit.remote_path);
        Ok(())
    }
}

impl std::fmt::Debug for DuckdbWarehouse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckdbWarehouse")
            .field("database", &self.database)
            .field("stage", &self.stage.scheme())
            .finish_non_exhaustive()
    }
}

/// Dotted table name split into catalog, schema and table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub table: String,
}

impl QualifiedName {
    /// Parse `TABLE`, `SCHEMA.TABLE` or `CATALOG.SCHEMA.TABLE`
    pub fn parse(name: &str) -> Result<Self> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(Error::database(format!("Invalid table name: {name:?}")));
        }

        match parts.as_slice() {
            [table] => Ok(Self {
                catalog: None,
                schema: None,
                table: table.to_string(),
            }),
            [schema, table] => Ok(Self {
                catalog: None,
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            [catalog, schema, table] => Ok(Self {
                catalog: Some(catalog.to_string()),
                schema: Some(schema.to_string()),
                table: table.to_string(),
            }),
            _ => Err(Error::database(format!(
                "Invalid table name: {name:?} has more than three parts"
            ))),
        }
    }

    /// Quoted schema name including its catalog, if any
    pub fn quoted_schema(&self) -> Option<String> {
        let schema = self.schema.as_ref()?;
        Some(match &self.catalog {
            Some(catalog) => format!("{}.{}", quote_ident(catalog), quote_ident(schema)),
            None => quote_ident(schema),
        })
    }

    /// Fully quoted table name
    pub fn quoted(&self) -> String {
        match self.quoted_schema() {
            Some(schema) => format!("{schema}.{}", quote_ident(&self.table)),
            None => quote_ident(&self.table),
        }
    }
}

/// SQL type used for a column
pub fn column_sql_type(column_type: &ColumnType) -> String {
    match column_type {
        ColumnType::Boolean => "BOOLEAN".to_string(),
        ColumnType::Integer => "BIGINT".to_string(),
        ColumnType::Float => "DOUBLE".to_string(),
        ColumnType::String => "VARCHAR".to_string(),
        ColumnType::Object | ColumnType::Array | ColumnType::Variant => "JSON".to_string(),
        ColumnType::Custom(sql) => sql.clone(),
    }
}

fn attach_sql(catalog: &str, target: &str) -> String {
    format!(
        "ATTACH IF NOT EXISTS {} AS {};",
        quote_literal(target),
        quote_ident(catalog)
    )
}

fn create_table_sql(name: &QualifiedName, schema: &TableSchema) -> String {
    let columns: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| {
            format!(
                "{} {}",
                quote_ident(&column.name),
                column_sql_type(&column.column_type)
            )
        })
        .collect();

    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        name.quoted(),
        columns.join(", ")
    );

    match name.quoted_schema() {
        Some(schema) => format!("CREATE SCHEMA IF NOT EXISTS {schema}; {create}"),
        None => create,
    }
}

fn populate_sql(name: &QualifiedName, schema: &TableSchema, files: &[String]) -> String {
    let column_list: Vec<String> = schema.names().map(quote_ident).collect();
    let column_list = column_list.join(", ");

    let column_types: Vec<String> = schema
        .columns()
        .iter()
        .map(|column| {
            format!(
                "{}: {}",
                quote_literal(&column.name),
                quote_literal(&column_sql_type(&column.column_type))
            )
        })
        .collect();

    let files: Vec<String> = files.iter().map(|file| quote_literal(file)).collect();

    format!(
        "INSERT INTO {} ({column_list}) SELECT {column_list} FROM read_json([{}], format = 'newline_delimited', columns = {{{}}});",
        name.quoted(),
        files.join(", "),
        column_types.join(", ")
    )
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
