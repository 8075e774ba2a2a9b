//! # Core Type Definitions
//!
//! This module contains the shared types of the GBD engine:
//! - The error type (`GbdError`) and its `Result` alias
//! - Feature values as returned by queries (`Value`, `QueryResult`)
//! - Extraction runner records (`Task`, `FeatureRecord`, `Limits`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the GBD engine.
///
/// The `Display` form is the single user-visible diagnostic line
/// `<Kind>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GbdError {
    /// Empty catalog list, unreadable catalog, unknown context.
    #[error("ConfigurationError: {0}")]
    Configuration(String),

    /// Invalid or conflicting feature definitions.
    #[error("SchemaError: {0}")]
    Schema(String),

    /// Malformed query text.
    #[error("ParserError: {message} at position {position} in query '{query}'")]
    Parser {
        /// The query as given by the user.
        query: String,
        /// Byte offset where parsing failed.
        position: usize,
        /// What the parser expected.
        message: String,
    },

    /// Feature or translator not found in any attached catalog.
    #[error("ResolutionError: {0}")]
    Resolution(String),

    /// Operational error of the relational engine.
    #[error("StorageError: {0}")]
    Storage(String),

    /// An extraction task failed or exceeded a resource limit.
    #[error("TaskError: {0}")]
    Task(String),

    /// File-system error outside the relational engine.
    #[error("IoError: {0}")]
    Io(String),
}

impl GbdError {
    /// The bare kind label, e.g. `SchemaError`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Schema(_) => "SchemaError",
            Self::Parser { .. } => "ParserError",
            Self::Resolution(_) => "ResolutionError",
            Self::Storage(_) => "StorageError",
            Self::Task(_) => "TaskError",
            Self::Io(_) => "IoError",
        }
    }

    /// The diagnostic without its kind label.
    #[must_use]
    pub fn message(&self) -> String {
        let full = self.to_string();
        full.strip_prefix(self.kind())
            .and_then(|rest| rest.strip_prefix(": "))
            .map_or_else(|| full.clone(), str::to_string)
    }
}

impl From<rusqlite::Error> for GbdError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for GbdError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<csv::Error> for GbdError {
    fn from(err: csv::Error) -> Self {
        Self::Configuration(format!("Malformed tabular file: {err}"))
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, GbdError>;

// =============================================================================
// VALUES
// =============================================================================

/// A feature value as read back from a catalog.
///
/// Catalogs store untyped text. Text read from a catalog stays `Text` so it
/// round-trips unchanged; engine-computed aggregates (`count`, `avg`, ...)
/// come back as `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Number(f64),
    Null,
}

impl Value {
    /// Numeric interpretation of this value, if any.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Text(s) => s.trim().parse::<f64>().ok(),
            Self::Number(n) => Some(*n),
            Self::Null => None,
        }
    }

    /// Text view of this value; `None` for `Null`.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            other => Some(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Null => write!(f, "[None]"),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Number(i as f64),
            ValueRef::Real(r) => Self::Number(r),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Self::Text(String::from_utf8_lossy(t).into_owned())
            }
        }
    }
}

/// Tabular result of a compiled query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Output column labels: the group-by feature followed by the resolve list.
    pub columns: Vec<String>,
    /// One row per result tuple, aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of the first (group-by) column, as text.
    #[must_use]
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_text))
            .collect()
    }
}

// =============================================================================
// EXTRACTION RUNNER RECORDS
// =============================================================================

/// One unit of work for the extraction runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Known hash of the instance; `None` for pure hashing jobs.
    pub hash: Option<String>,
    /// Path of the benchmark file.
    pub path: PathBuf,
}

impl Task {
    #[must_use]
    pub fn new(hash: Option<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            hash,
            path: path.into(),
        }
    }
}

/// One `(feature, hash, value)` tuple produced by a task function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: String,
    pub hash: String,
    pub value: String,
}

impl FeatureRecord {
    #[must_use]
    pub fn new(name: impl Into<String>, hash: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            value: value.into(),
        }
    }
}

/// Worker count and per-task resource caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Number of parallel jobs; `1` runs sequentially in-process.
    pub jobs: usize,
    /// Wall time limit per task, in seconds.
    pub tlim: u64,
    /// Address space limit per task, in megabytes.
    pub mlim: u64,
    /// File size limit per task, in megabytes.
    pub flim: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            jobs: 1,
            tlim: 5000,
            mlim: 2000,
            flim: 1000,
        }
    }
}

impl Limits {
    /// File size limit in bytes.
    #[must_use]
    pub const fn flim_bytes(&self) -> u64 {
        self.flim.saturating_mul(1024 * 1024)
    }

    /// Address space limit in bytes.
    #[must_use]
    pub const fn mlim_bytes(&self) -> u64 {
        self.mlim.saturating_mul(1024 * 1024)
    }
}
