//! # API Request/Response Types
//!
//! This module defines the query-string parameters and JSON structures of
//! the HTTP front-end.

use gbd_core::{Collapse, Context, GbdError, QueryResult, QuerySpec, Value};
use serde::{Deserialize, Serialize};

/// Rows per page of the index page.
pub const PAGE_SIZE: usize = 1000;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Attached catalogs in precedence order.
    pub databases: Vec<String>,
}

impl HealthResponse {
    pub fn new(databases: Vec<String>) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            databases,
        }
    }
}

// =============================================================================
// QUERY PARAMETERS
// =============================================================================

/// Query-string parameters shared by the query endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParams {
    /// Query text; empty selects every instance.
    pub query: Option<String>,
    /// Context of the listed instances (default `cnf`).
    pub context: Option<String>,
    /// Comma-separated features to resolve.
    pub resolve: Option<String>,
    pub collapse: Option<String>,
    /// Catalog whose features the index page shows.
    pub database: Option<String>,
    /// Zero-based page of the index page.
    pub page: Option<usize>,
}

impl QueryParams {
    /// Selected context; unknown names are a configuration error.
    pub fn context(&self) -> Result<Context, GbdError> {
        match self.context.as_deref().filter(|c| !c.is_empty()) {
            Some(name) => name.parse(),
            None => Ok(Context::Cnf),
        }
    }

    /// Query text with surrounding whitespace removed.
    pub fn query_text(&self) -> &str {
        self.query.as_deref().map_or("", str::trim)
    }

    /// Compile the parameters into a query grouped by the context hash.
    pub fn to_spec(&self) -> Result<QuerySpec, GbdError> {
        let ctx = self.context()?;
        let resolve: Vec<String> = self
            .resolve
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
        let collapse = match self.collapse.as_deref().filter(|c| !c.is_empty()) {
            Some(c) => c.parse()?,
            None => Collapse::GroupConcat,
        };
        Ok(QuerySpec {
            query: Some(self.query_text().to_string()).filter(|q| !q.is_empty()),
            resolve,
            group_by: Some(format!("{ctx}:hash")),
            collapse,
            ..QuerySpec::default()
        })
    }
}

/// File name stem derived from a query, as used for downloads.
pub fn query_to_name(query: &str) -> String {
    if query.is_empty() {
        return "allinstances".to_string();
    }
    query
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

// =============================================================================
// QUERY RESPONSE
// =============================================================================

/// JSON query result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub total: usize,
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn from_result(result: QueryResult) -> Self {
        Self {
            success: true,
            total: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            columns: vec![],
            rows: vec![],
            total: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_compile_to_context_grouping() {
        let params = QueryParams {
            query: Some("  family = crypto ".to_string()),
            context: Some("kis".to_string()),
            resolve: Some("nodes, ,edges".to_string()),
            collapse: Some("min".to_string()),
            ..QueryParams::default()
        };
        let spec = params.to_spec().expect("spec");
        assert_eq!(spec.query.as_deref(), Some("family = crypto"));
        assert_eq!(spec.group_by.as_deref(), Some("kis:hash"));
        assert_eq!(spec.resolve, vec!["nodes".to_string(), "edges".to_string()]);
        assert_eq!(spec.collapse, Collapse::Min);
    }

    #[test]
    fn empty_params_select_everything() {
        let spec = QueryParams::default().to_spec().expect("spec");
        assert!(spec.query.is_none());
        assert_eq!(spec.group_by.as_deref(), Some("cnf:hash"));
    }

    #[test]
    fn unknown_context_is_rejected() {
        let params = QueryParams {
            context: Some("nope".to_string()),
            ..QueryParams::default()
        };
        assert!(params.to_spec().is_err());
    }

    #[test]
    fn query_names_are_file_safe() {
        assert_eq!(query_to_name(""), "allinstances");
        assert_eq!(query_to_name("family = a%"), "family___a_");
    }
}
