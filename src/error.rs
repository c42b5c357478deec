//! Error types for the stage exporter
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.

use thiserror::Error;

/// The main error type for the stage exporter
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Template Errors
    // ============================================================================
    #[error("Template error: {message}")]
    Template { message: String },

    #[error("Unresolved placeholder '{placeholder}' in template '{template}'")]
    UnresolvedPlaceholder { placeholder: String, template: String },

    // ============================================================================
    // Record and Schema Errors
    // ============================================================================
    #[error("Invalid record: {message}")]
    InvalidRecord { message: String },

    #[error("Destination '{destination}': conflicting value types for columns {columns:?}")]
    SchemaConflict {
        destination: String,
        columns: Vec<String>,
    },

    #[error("Destination '{destination}': fields {fields:?} are not in the predefined columns")]
    UnexpectedFields {
        destination: String,
        fields: Vec<String>,
    },

    #[error("Destination '{destination}': no valid columns found")]
    NoColumns { destination: String },

    // ============================================================================
    // Buffer and Stage Errors
    // ============================================================================
    #[error("Buffer for '{destination}' (batch {batch}) is sealed")]
    BufferSealed { destination: String, batch: u64 },

    #[error("Upload to '{path}' failed: {message}")]
    Upload { path: String, message: String },

    #[error("Stage error: {message}")]
    Stage { message: String },

    // ============================================================================
    // Warehouse Errors
    // ============================================================================
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("{operation} failed for '{destination}': {message}")]
    DestinationOperation {
        destination: String,
        operation: String,
        message: String,
    },

    // ============================================================================
    // Lifecycle Errors
    // ============================================================================
    #[error("Export already finished")]
    AlreadyFinished,

    #[error("Export failed for {failed} of {total} destinations")]
    ExportFailed { failed: usize, total: usize },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create an unresolved placeholder error
    pub fn unresolved(placeholder: impl Into<String>, template: impl Into<String>) -> Self {
        Self::UnresolvedPlaceholder {
            placeholder: placeholder.into(),
            template: template.into(),
        }
    }

    /// Create an invalid record error
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Create an upload error
    pub fn upload(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upload {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a stage error
    pub fn stage(message: impl Into<String>) -> Self {
        Self::Stage {
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Wrap a failed warehouse call for a destination
    pub fn destination_op(
        destination: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DestinationOperation {
            destination: destination.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upload { .. } | Error::Io(_))
    }
}

/// Result type alias for the stage exporter
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
