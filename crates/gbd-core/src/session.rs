//! # Session Module
//!
//! High-level interface over a federated [`Database`]: queries return
//! materialized [`QueryResult`]s, mutations check feature existence the way
//! a user expects before touching the catalog.

use crate::context::Contexts;
use crate::query::{Collapse, QuerySpec, compile};
use crate::schema::{FeatureInfo, sanitize_column};
use crate::store::Database;
use crate::types::{GbdError, QueryResult, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Summary statistics of one feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStats {
    pub name: String,
    /// Catalog holding the resolved binding.
    pub database: String,
    pub default: Option<String>,
    /// Hashes carrying a value other than the default.
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Number of values that do not parse as numbers.
    pub non_numeric: usize,
    /// Distinct non-numeric values.
    pub values: Vec<String>,
}

/// A query session owning one connection to a list of catalogs.
#[derive(Debug)]
pub struct Session {
    db: Database,
}

impl Session {
    /// Open catalogs `paths` (first one is the default write target).
    pub fn open(paths: &[PathBuf], contexts: Contexts) -> Result<Self> {
        Ok(Self {
            db: Database::open(paths, contexts)?,
        })
    }

    #[must_use]
    pub const fn with_database(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Commit pending work and end the session.
    pub fn close(self) -> Result<()> {
        self.db.close()
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Compile and run `spec`.
    pub fn query(&self, spec: &QuerySpec) -> Result<QueryResult> {
        let compiled = compile(&self.db, spec)?;
        let rows = self.db.query_rows(&compiled.sql)?;
        debug!(rows = rows.len(), "Query finished");
        Ok(QueryResult {
            columns: compiled.columns,
            rows,
        })
    }

    /// Hashes matching `query` (restricted to `hashes` when non-empty).
    pub fn query_hashes(&self, query: Option<&str>, hashes: &[String]) -> Result<Vec<String>> {
        let spec = QuerySpec {
            query: query.map(str::to_string),
            hashes: hashes.to_vec(),
            collapse: Collapse::None,
            ..QuerySpec::default()
        };
        Ok(self.query(&spec)?.first_column())
    }

    // =========================================================================
    // CATALOG INFORMATION
    // =========================================================================

    #[must_use]
    pub fn databases(&self) -> Vec<&str> {
        self.db.databases()
    }

    pub fn database_path(&self, db: &str) -> Result<Option<&Path>> {
        self.db.dpath(db)
    }

    /// Feature names of catalog `db`, or of all catalogs.
    pub fn features(&self, db: Option<&str>) -> Result<Vec<String>> {
        let names: BTreeSet<String> = match db {
            Some(db) => self
                .db
                .schema(db)?
                .features()
                .iter()
                .map(|f| f.name.clone())
                .collect(),
            None => self.db.features().iter().map(|f| f.name.clone()).collect(),
        };
        Ok(names.into_iter().collect())
    }

    /// Whether `name` (optionally `ctx:name`) exists in `db` or anywhere.
    pub fn feature_exists(&self, name: &str, db: Option<&str>) -> Result<bool> {
        match db {
            Some(db) => Ok(self.db.find_in(name, db)?.is_some()),
            None => Ok(self.db.find(name).is_ok()),
        }
    }

    /// Resolved binding of `name`.
    pub fn feature_binding(&self, name: &str) -> Result<&FeatureInfo> {
        self.db.find(name)
    }

    /// Count, default and numeric range of feature `name`.
    pub fn feature_info(&self, name: &str) -> Result<FeatureStats> {
        let finfo = self.db.find(name)?.clone();
        let spec = QuerySpec::default().resolve([name]).collapse(Collapse::None);
        let result = self.query(&spec)?;

        let mut count = 0;
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;
        let mut non_numeric = 0;
        let mut values = BTreeSet::new();
        for row in &result.rows {
            let Some(value) = row.get(1).and_then(crate::Value::as_text) else {
                continue;
            };
            if finfo.default.as_deref() == Some(value.as_str()) {
                continue;
            }
            count += 1;
            match row.get(1).and_then(crate::Value::as_number) {
                Some(n) => {
                    min = Some(min.map_or(n, |m| m.min(n)));
                    max = Some(max.map_or(n, |m| m.max(n)));
                }
                None => {
                    non_numeric += 1;
                    values.insert(value);
                }
            }
        }
        Ok(FeatureStats {
            name: name.to_string(),
            database: finfo.database,
            default: finfo.default,
            count,
            min,
            max,
            non_numeric,
            values: values.into_iter().collect(),
        })
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    pub fn create_feature(
        &mut self,
        name: &str,
        default: Option<&str>,
        target: Option<&str>,
    ) -> Result<()> {
        self.db.create_feature(name, default, target, false)
    }

    pub fn delete_feature(&mut self, name: &str, target: Option<&str>) -> Result<()> {
        self.db.delete_feature(name, target)
    }

    pub fn rename_feature(&mut self, old: &str, new: &str, target: Option<&str>) -> Result<()> {
        self.db.rename_feature(old, new, target)
    }

    pub fn set_values(
        &mut self,
        name: &str,
        value: &str,
        hashes: &[String],
        target: Option<&str>,
    ) -> Result<()> {
        self.db.set_values(name, value, hashes, target)
    }

    pub fn reset_values(
        &mut self,
        name: &str,
        values: &[String],
        hashes: &[String],
        target: Option<&str>,
    ) -> Result<()> {
        self.db.reset_values(name, values, hashes, target)
    }

    pub fn delete_hashes(&mut self, hashes: &[String], target: Option<&str>) -> Result<()> {
        self.db.delete_hashes_entirely(hashes, target)
    }

    /// Copy `old` into new feature `new`, limited to hashes matching
    /// `query` and `hashes` when either is given.
    pub fn copy_feature(
        &mut self,
        old: &str,
        new: &str,
        target: Option<&str>,
        query: Option<&str>,
        hashes: &[String],
    ) -> Result<()> {
        let filtered = query.is_some_and(|q| !q.trim().is_empty()) || !hashes.is_empty();
        if filtered {
            let selected = self.query_hashes(query, hashes)?;
            self.db.copy_feature(old, new, target, Some(&selected))
        } else {
            self.db.copy_feature(old, new, target, None)
        }
    }

    /// Write columns of a comma-delimited file into catalog features.
    ///
    /// `key` names the column holding hashes. Missing features are created
    /// with `default` (multi-valued when `None`). Empty cells are skipped.
    /// Returns the number of values written.
    pub fn import_csv(
        &mut self,
        file: &Path,
        key: &str,
        columns: &[String],
        default: Option<&str>,
        target: Option<&str>,
    ) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(file)?;
        let headers = reader.headers()?.clone();
        let position = |name: &str| headers.iter().position(|h| h == name);
        let key_index = position(key).ok_or_else(|| {
            GbdError::Configuration(format!(
                "Key column '{key}' not found in '{}'",
                file.display()
            ))
        })?;
        let mut selected = Vec::with_capacity(columns.len());
        for column in columns {
            let index = position(column).ok_or_else(|| {
                GbdError::Configuration(format!(
                    "Column '{column}' not found in '{}'",
                    file.display()
                ))
            })?;
            selected.push((sanitize_column(column), index));
        }

        // feature -> value -> hashes
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for record in reader.records() {
            let record = record?;
            let Some(hash) = record.get(key_index).filter(|h| !h.is_empty()) else {
                continue;
            };
            for (feature, index) in &selected {
                if let Some(value) = record.get(*index).filter(|v| !v.is_empty()) {
                    grouped
                        .entry(feature.clone())
                        .or_default()
                        .entry(value.to_string())
                        .or_default()
                        .push(hash.to_string());
                }
            }
        }

        let db = self.db.target_db(target)?;
        let mut written = 0;
        for (feature, _) in &selected {
            if self.db.find_in(feature, &db)?.is_none() {
                self.db.create_feature(feature, default, Some(&db), false)?;
            }
            if let Some(by_value) = grouped.get(feature) {
                for (value, hashes) in by_value {
                    self.db.set_values(feature, value, hashes, Some(&db))?;
                    written += hashes.len();
                }
            }
        }
        info!(file = %file.display(), catalog = %db, written, "Imported values");
        Ok(written)
    }
}
