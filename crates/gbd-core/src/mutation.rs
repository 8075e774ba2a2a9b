//! # Catalog Mutation
//!
//! Feature lifecycle and value writes on one target catalog.
//!
//! Every operation runs inside a savepoint ([`Database::atomically`]): it
//! either applies completely or leaves the catalog untouched. Only feature
//! lifecycle operations reload the catalog schema
//! ([`Database::restructure`]). Hash lists are bound in slices of
//! [`CHUNK_SIZE`].
//!
//! ## Storage by kind
//!
//! | Kind | Values | Main table |
//! |------|--------|------------|
//! | Unique | column of the main table, `NOT NULL DEFAULT <d>` | the column itself |
//! | Multi-valued | own `(hash, value)` table with `UNIQUE(hash, value)` | FK column, `'None'` or the hash |

use crate::primitives::{CHUNK_SIZE, DROP_COLUMN_MIN_VERSION, NONE_SENTINEL, sql_literal};
use crate::schema::{FeatureInfo, Schema, valid_feature_or_raise};
use crate::store::Database;
use crate::types::{GbdError, Result};
use rusqlite::{Connection, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn drop_column_supported() -> bool {
    rusqlite::version_number() >= DROP_COLUMN_MIN_VERSION
}

fn is_protected(name: &str) -> bool {
    matches!(name, "hash" | "filename")
}

/// `DROP VIEW` + `CREATE VIEW` of the basename view next to `local`.
fn create_filename_view(conn: &Connection, schema: &Schema, local: &FeatureInfo) -> Result<()> {
    let view = schema.table_name("filename", local.context);
    conn.execute_batch(&format!(
        "DROP VIEW IF EXISTS {db}.{view};
         CREATE VIEW {db}.{view} AS SELECT hash, replace(value, rtrim(value, replace(value, '/', '')), '') AS value FROM {table};",
        db = schema.name,
        table = local.table,
    ))?;
    Ok(())
}

impl Database {
    /// Split an optional `ctx:` qualifier off a feature name.
    fn split_feature_name<'a>(
        &self,
        name: &'a str,
        schema: &Schema,
    ) -> Result<(crate::Context, &'a str)> {
        match name.split_once(':') {
            Some((ctx, bare)) => Ok((self.contexts().parse(ctx)?, bare)),
            None => Ok((schema.context, name)),
        }
    }

    /// Writable binding of `name` in the target catalog.
    fn writable_binding(&self, name: &str, db: &str) -> Result<FeatureInfo> {
        let finfo = self.find_in(name, db)?.cloned().ok_or_else(|| {
            GbdError::Resolution(format!("Feature '{name}' not found in catalog '{db}'"))
        })?;
        if finfo.is_virtual {
            return Err(GbdError::Schema(format!(
                "Feature '{name}' is virtual and cannot be written"
            )));
        }
        if finfo.name == "hash" {
            return Err(GbdError::Schema("Feature 'hash' cannot be written".to_string()));
        }
        Ok(finfo)
    }

    /// Existing binding of `name` for delete/rename, as a schema error.
    fn existing_binding(&self, name: &str, db: &str) -> Result<FeatureInfo> {
        let finfo = self.find_in(name, db)?.cloned().ok_or_else(|| {
            GbdError::Schema(format!("Feature '{name}' does not exist in catalog '{db}'"))
        })?;
        if is_protected(&finfo.name) || finfo.is_virtual {
            return Err(GbdError::Schema(format!(
                "Feature '{name}' is managed by the system"
            )));
        }
        Ok(finfo)
    }

    // =========================================================================
    // FEATURE LIFECYCLE
    // =========================================================================

    /// Create feature `name` (`name` or `ctx:name`) in `target`.
    ///
    /// With a default the feature is unique, otherwise multi-valued. In
    /// permissive mode name validation is skipped and an existing feature is
    /// not an error.
    pub fn create_feature(
        &mut self,
        name: &str,
        default: Option<&str>,
        target: Option<&str>,
        permissive: bool,
    ) -> Result<()> {
        let db = self.target_db(target)?;
        let schema = self.schema(&db)?;
        let (ctx, bare) = self.split_feature_name(name, schema)?;
        if !permissive {
            valid_feature_or_raise(bare, self.contexts())?;
        }
        if schema.has_feature(bare, ctx) {
            if permissive {
                return Ok(());
            }
            return Err(GbdError::Schema(format!(
                "Feature '{name}' does already exist in catalog '{db}'"
            )));
        }
        if let Some(d) = default {
            if let Some(other) = self
                .bindings(bare)
                .iter()
                .find(|f| f.context == ctx && f.is_unique() && f.default.as_deref() != Some(d))
            {
                return Err(GbdError::Schema(format!(
                    "Feature '{name}' exists in catalog '{}' with a different default ({:?})",
                    other.database, other.default
                )));
            }
        }
        info!(feature = %name, catalog = %db, default = ?default, "Creating feature");

        self.restructure(&db, |conn, schema| {
            schema.create_main_table(conn, ctx)?;
            let main = schema.main_table(ctx);
            match default {
                Some(d) => {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {db}.{main} ADD COLUMN {bare} TEXT NOT NULL DEFAULT {}",
                        sql_literal(d),
                        db = schema.name,
                    ))?;
                }
                None => {
                    let table = schema.table_name(bare, ctx);
                    conn.execute_batch(&format!(
                        "CREATE TABLE IF NOT EXISTS {db}.{table} (hash TEXT NOT NULL, value TEXT NOT NULL, CONSTRAINT all_unique UNIQUE(hash, value));
                         INSERT OR IGNORE INTO {db}.{table} (hash, value) VALUES ({none}, {none});
                         ALTER TABLE {db}.{main} ADD COLUMN {bare} TEXT NOT NULL DEFAULT {none};",
                        db = schema.name,
                        none = sql_literal(NONE_SENTINEL),
                    ))?;
                    schema.create_hash_trigger(conn, &table, ctx)?;
                    if bare == "local" {
                        let local = FeatureInfo {
                            name: bare.to_string(),
                            database: schema.name.clone(),
                            context: ctx,
                            table,
                            column: "value".to_string(),
                            default: None,
                            is_virtual: false,
                            main: false,
                            fk: Some(bare.to_string()),
                        };
                        create_filename_view(conn, schema, &local)?;
                    }
                }
            }
            Ok(())
        })
    }

    /// Drop feature `name` from `target`.
    pub fn delete_feature(&mut self, name: &str, target: Option<&str>) -> Result<()> {
        let db = self.target_db(target)?;
        let finfo = self.existing_binding(name, &db)?;
        let main_table = self.schema(&db)?.main_table(finfo.context);
        let drops_column = finfo.main || finfo.fk.is_some();
        if drops_column && !drop_column_supported() {
            return Err(GbdError::Schema(format!(
                "Cannot delete feature '{name}': SQLite {} does not support dropping columns",
                rusqlite::version()
            )));
        }
        info!(feature = %name, catalog = %db, "Deleting feature");

        self.restructure(&db, |conn, schema| {
            if finfo.main {
                conn.execute_batch(&format!(
                    "ALTER TABLE {db}.{main_table} DROP COLUMN {col}",
                    db = schema.name,
                    col = finfo.column
                ))?;
                return Ok(());
            }
            if finfo.name == "local" {
                let view = schema.table_name("filename", finfo.context);
                conn.execute_batch(&format!("DROP VIEW IF EXISTS {}.{view}", schema.name))?;
            }
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}.{}", schema.name, finfo.table))?;
            if let Some(fk) = &finfo.fk {
                conn.execute_batch(&format!(
                    "ALTER TABLE {}.{main_table} DROP COLUMN {fk}",
                    schema.name
                ))?;
            }
            Ok(())
        })
    }

    /// Rename feature `old` to `new` within `target`.
    pub fn rename_feature(&mut self, old: &str, new: &str, target: Option<&str>) -> Result<()> {
        let db = self.target_db(target)?;
        valid_feature_or_raise(new, self.contexts())?;
        let finfo = self.existing_binding(old, &db)?;
        if finfo.name == "local" {
            return Err(GbdError::Schema("Feature 'local' cannot be renamed".to_string()));
        }
        if self.schema(&db)?.has_feature(new, finfo.context) {
            return Err(GbdError::Schema(format!(
                "Feature '{new}' does already exist in catalog '{db}'"
            )));
        }
        info!(from = %old, to = %new, catalog = %db, "Renaming feature");

        self.restructure(&db, |conn, schema| {
            let main = schema.main_table(finfo.context);
            if finfo.main {
                conn.execute_batch(&format!(
                    "ALTER TABLE {}.{main} RENAME COLUMN {} TO {new}",
                    schema.name, finfo.column
                ))?;
                return Ok(());
            }
            let new_table = schema.table_name(new, finfo.context);
            conn.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {db}.{old_table}_hash;
                 DROP TRIGGER IF EXISTS {db}.{old_table}_dval;
                 ALTER TABLE {db}.{old_table} RENAME TO {new_table};",
                db = schema.name,
                old_table = finfo.table,
            ))?;
            schema.create_hash_trigger(conn, &new_table, finfo.context)?;
            if let Some(fk) = &finfo.fk {
                conn.execute_batch(&format!(
                    "ALTER TABLE {}.{main} RENAME COLUMN {fk} TO {new}",
                    schema.name
                ))?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // VALUES
    // =========================================================================

    /// Assign `value` to feature `name` for every hash in `hashes`.
    pub fn set_values(
        &mut self,
        name: &str,
        value: &str,
        hashes: &[String],
        target: Option<&str>,
    ) -> Result<()> {
        let db = self.target_db(target)?;
        let finfo = self.writable_binding(name, &db)?;
        let hashes: Vec<&String> = hashes.iter().filter(|h| *h != NONE_SENTINEL).collect();
        if hashes.is_empty() {
            debug!(feature = %name, "set_values without hashes");
            return Ok(());
        }

        self.atomically(&db, |conn, schema| {
            let main = schema.main_table(finfo.context);
            if finfo.main {
                let mut stmt = conn.prepare(&format!(
                    "INSERT INTO {db}.{main} (hash, {col}) VALUES (?1, ?2) \
                     ON CONFLICT (hash) DO UPDATE SET {col} = excluded.{col}",
                    db = schema.name,
                    col = finfo.column,
                ))?;
                for hash in &hashes {
                    stmt.execute(params![hash, value])?;
                }
                return Ok(());
            }
            let mut stmt = conn.prepare(&format!(
                "INSERT OR IGNORE INTO {}.{} (hash, value) VALUES (?1, ?2)",
                schema.name, finfo.table
            ))?;
            for hash in &hashes {
                stmt.execute(params![hash, value])?;
            }
            if let Some(fk) = &finfo.fk {
                for chunk in hashes.chunks(CHUNK_SIZE) {
                    conn.execute(
                        &format!(
                            "UPDATE {}.{main} SET {fk} = hash WHERE hash IN ({})",
                            schema.name,
                            placeholders(chunk.len())
                        ),
                        params_from_iter(chunk.iter()),
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Remove values of feature `name`, matching `values` and/or `hashes`.
    ///
    /// Multi-valued rows are deleted; unique values fall back to the default.
    /// With neither values nor hashes this is a no-op.
    pub fn reset_values(
        &mut self,
        name: &str,
        values: &[String],
        hashes: &[String],
        target: Option<&str>,
    ) -> Result<()> {
        if values.is_empty() && hashes.is_empty() {
            debug!(feature = %name, "reset_values without values or hashes");
            return Ok(());
        }
        let db = self.target_db(target)?;
        let finfo = self.writable_binding(name, &db)?;
        let hash_chunks: Vec<&[String]> = if hashes.is_empty() {
            vec![&hashes[0..0]]
        } else {
            hashes.chunks(CHUNK_SIZE).collect()
        };
        let value_chunks: Vec<&[String]> = if values.is_empty() {
            vec![&values[0..0]]
        } else {
            values.chunks(CHUNK_SIZE).collect()
        };

        self.atomically(&db, |conn, schema| {
            let main = schema.main_table(finfo.context);
            let table = format!("{}.{}", schema.name, finfo.table);
            let mut affected: BTreeSet<String> = BTreeSet::new();
            for hchunk in &hash_chunks {
                for vchunk in &value_chunks {
                    let mut clauses = vec![format!("hash != {}", sql_literal(NONE_SENTINEL))];
                    if !hchunk.is_empty() {
                        clauses.push(format!("hash IN ({})", placeholders(hchunk.len())));
                    }
                    if !vchunk.is_empty() {
                        clauses.push(format!(
                            "{} IN ({})",
                            finfo.column,
                            placeholders(vchunk.len())
                        ));
                    }
                    let filter = clauses.join(" AND ");
                    let bound: Vec<&String> = hchunk.iter().chain(vchunk.iter()).collect();

                    if finfo.main {
                        let default = finfo.default.as_deref().unwrap_or(NONE_SENTINEL);
                        conn.execute(
                            &format!(
                                "UPDATE {table} SET {} = {} WHERE {filter}",
                                finfo.column,
                                sql_literal(default)
                            ),
                            params_from_iter(bound.iter()),
                        )?;
                        continue;
                    }
                    let mut stmt =
                        conn.prepare(&format!("SELECT DISTINCT hash FROM {table} WHERE {filter}"))?;
                    let rows = stmt.query_map(params_from_iter(bound.iter()), |r| r.get(0))?;
                    for row in rows {
                        affected.insert(row?);
                    }
                    conn.execute(
                        &format!("DELETE FROM {table} WHERE {filter}"),
                        params_from_iter(bound.iter()),
                    )?;
                }
            }
            if let Some(fk) = &finfo.fk {
                let affected: Vec<String> = affected.into_iter().collect();
                for chunk in affected.chunks(CHUNK_SIZE) {
                    conn.execute(
                        &format!(
                            "UPDATE {db}.{main} SET {fk} = {none} WHERE hash IN ({}) AND hash NOT IN (SELECT hash FROM {table})",
                            placeholders(chunk.len()),
                            db = schema.name,
                            none = sql_literal(NONE_SENTINEL),
                        ),
                        params_from_iter(chunk.iter()),
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Remove every trace of `hashes` from all tables of `target`.
    pub fn delete_hashes_entirely(&mut self, hashes: &[String], target: Option<&str>) -> Result<()> {
        let db = self.target_db(target)?;
        let hashes: Vec<&String> = hashes.iter().filter(|h| *h != NONE_SENTINEL).collect();
        if hashes.is_empty() {
            return Ok(());
        }
        info!(count = hashes.len(), catalog = %db, "Deleting hashes");
        self.atomically(&db, |conn, schema| {
            let tables: BTreeSet<&str> = schema
                .features()
                .iter()
                .filter(|f| !f.is_virtual)
                .map(|f| f.table.as_str())
                .collect();
            for table in tables {
                for chunk in hashes.chunks(CHUNK_SIZE) {
                    conn.execute(
                        &format!(
                            "DELETE FROM {}.{table} WHERE hash IN ({})",
                            schema.name,
                            placeholders(chunk.len())
                        ),
                        params_from_iter(chunk.iter()),
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Copy feature `old` (resolved by precedence) into a new feature `new`
    /// of `target`. With `hashes`, only those hashes are copied.
    pub fn copy_feature(
        &mut self,
        old: &str,
        new: &str,
        target: Option<&str>,
        hashes: Option<&[String]>,
    ) -> Result<()> {
        let source = self.find(old)?.clone();
        if source.name == "hash" {
            return Err(GbdError::Schema("Feature 'hash' cannot be copied".to_string()));
        }
        let mut filter = vec![format!("hash != {}", sql_literal(NONE_SENTINEL))];
        if source.main {
            if let Some(d) = &source.default {
                filter.push(format!("{} != {}", source.column, sql_literal(d)));
            }
        }
        let base = format!(
            "SELECT hash, {} FROM {} WHERE {}",
            source.column,
            source.table_address(),
            filter.join(" AND ")
        );

        let mut by_value: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut collect = |sql: &str, bound: &[String]| -> Result<()> {
            let mut stmt = self.conn().prepare(sql)?;
            let rows = stmt.query_map(params_from_iter(bound.iter()), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
            })?;
            for row in rows {
                let (hash, value) = row?;
                if let Some(value) = value {
                    by_value.entry(value).or_default().push(hash);
                }
            }
            Ok(())
        };
        match hashes {
            Some(hashes) => {
                for chunk in hashes.chunks(CHUNK_SIZE) {
                    collect(
                        &format!("{base} AND hash IN ({})", placeholders(chunk.len())),
                        chunk,
                    )?;
                }
            }
            None => collect(&base, &[])?,
        }

        let default = if source.main { source.default.as_deref() } else { None };
        let qualified = format!("{}:{new}", source.context);
        self.create_feature(&qualified, default, target, false)?;
        for (value, hashes) in by_value {
            self.set_values(&qualified, &value, &hashes, target)?;
        }
        Ok(())
    }
}
