//! Error taxonomy for an ingestion run.
//!
//! Fetch, normalize and per-record load errors are recoverable: the caller
//! skips the unit and keeps going. `StoreError` and `ConfigError` are fatal.

use thiserror::Error;

/// HTTP or transport failure for a single upstream resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fetch failed for {resource} (status {})", status_label(.status))]
pub struct FetchError {
    /// HTTP status when a response was received, `None` for transport failures.
    pub status: Option<u16>,
    pub resource: String,
}

fn status_label(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "none".to_string())
}

/// Raw document could not be mapped to entity records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("malformed document: {reason}")]
    Malformed { reason: String },
}

impl NormalizeError {
    pub fn missing(field: impl Into<String>) -> Self {
        NormalizeError::MissingField {
            field: field.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        NormalizeError::Malformed {
            reason: reason.into(),
        }
    }
}

/// Failure to persist a single record.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("{table} record {key} references missing {parent_table} row {parent_id}")]
    ReferentialIntegrity {
        table: &'static str,
        key: String,
        parent_table: &'static str,
        parent_id: i64,
    },

    #[error("store error on {table} record {key}: {source}")]
    Store {
        table: &'static str,
        key: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Store cannot be opened or its schema cannot be created. Aborts the run.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open store at {location}: {source}")]
    Open {
        location: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to create table {table}: {source}")]
    Schema {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Reading or writing an intermediate JSON file.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required setting {0} is not set")]
    Missing(&'static str),

    #[error("setting {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}
