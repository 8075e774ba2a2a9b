//! # Catalog Schema
//!
//! Per-catalog inventory of features, inferred from the catalog itself.
//!
//! ## Layout rules
//!
//! - A catalog's context is derived from its logical name (`kis_db` is a
//!   `kis` catalog, `mydb` a `cnf` catalog).
//! - Tables of the catalog's own context are unprefixed (`features`,
//!   `runtime`, `to_kis`); tables of any other context carry a `<ctx>_`
//!   prefix (`cnf_features`, `cnf_local`).
//! - The main table of a context holds `hash UNIQUE NOT NULL`, one column per
//!   unique feature, and one foreign-key column per multi-valued feature
//!   (named after the feature's table).
//! - Every other table is a multi-valued feature with exactly the columns
//!   `hash` and `value`. Views are virtual features and may have any columns.

use crate::context::{Context, Contexts};
use crate::primitives::{
    MAIN_TABLE, NONE_SENTINEL, SQLITE_HEADER_SIZE, SQLITE_MAGIC, is_reserved_name, is_sql_keyword,
    sql_literal,
};
use crate::types::{GbdError, Result};
use regex::Regex;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

static FEATURE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]+$").expect("valid feature name regex"));

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("valid regex"));

static NON_ALNUM_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z]+").expect("valid regex"));

// =============================================================================
// FEATURE INFO
// =============================================================================

/// Location and metadata of one feature binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureInfo {
    /// Bare feature name (`runtime`, `hash`, `local`).
    pub name: String,
    /// Logical name of the catalog holding the feature.
    pub database: String,
    pub context: Context,
    /// Table holding the values.
    pub table: String,
    /// Column holding the values (`value` for multi-valued features).
    pub column: String,
    /// Declared default; `None` for multi-valued and virtual features.
    pub default: Option<String>,
    /// `true` for views and imported tabular files.
    pub is_virtual: bool,
    /// `true` if the feature lives in its context's main table.
    pub main: bool,
    /// Main-table column referencing a multi-valued feature's table.
    pub fk: Option<String>,
}

impl FeatureInfo {
    /// `db.table.column`
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}.{}.{}", self.database, self.table, self.column)
    }

    /// `db.table`
    #[must_use]
    pub fn table_address(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// `ctx:name`
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.context, self.name)
    }

    /// Unique features live in the main table and carry a default.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.main && self.name != "hash"
    }

    /// The `hash` column of a main table.
    #[must_use]
    pub fn is_main_hash(&self) -> bool {
        self.main && self.name == "hash"
    }
}

// =============================================================================
// CATALOG HELPERS
// =============================================================================

/// Whether `path` holds a SQLite database (an empty file counts).
pub fn is_database(path: &Path) -> Result<bool> {
    let size = std::fs::metadata(path)?.len();
    if size == 0 {
        return Ok(true);
    }
    if size < SQLITE_HEADER_SIZE {
        return Ok(false);
    }
    let mut header = [0u8; 16];
    File::open(path)?.read_exact(&mut header)?;
    Ok(&header == SQLITE_MAGIC)
}

/// Logical catalog name derived from a file path.
#[must_use]
pub fn dbname_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = if stem.starts_with(|c: char| c.is_ascii_digit()) {
        format!("cnf_{stem}")
    } else {
        stem
    };
    NON_ALNUM.replace_all(&stem, "_").into_owned()
}

/// Column name of an imported tabular file, made addressable.
#[must_use]
pub fn sanitize_column(name: &str) -> String {
    let cleaned = NON_ALNUM_RUN.replace_all(name.trim(), "_").into_owned();
    if cleaned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        cleaned
    } else {
        format!("f_{cleaned}")
    }
}

/// Reject names that cannot be used for user-created features.
pub fn valid_feature_or_raise(name: &str, contexts: &Contexts) -> Result<()> {
    if !FEATURE_NAME.is_match(name) {
        return Err(GbdError::Schema(format!(
            "Feature name '{name}' must be alphanumeric (incl. underscore), start with a letter and have at least two characters"
        )));
    }
    if is_reserved_name(name) {
        return Err(GbdError::Schema(format!("Feature name '{name}' is reserved")));
    }
    if is_sql_keyword(name) || name.starts_with("sqlite_") || name.starts_with("__") {
        return Err(GbdError::Schema(format!(
            "Feature name '{name}' is reserved by sqlite"
        )));
    }
    if let Some((ctx, _)) = contexts.split_prefixed(name) {
        return Err(GbdError::Schema(format!(
            "Feature name '{name}' starts with the context prefix '{ctx}_'"
        )));
    }
    Ok(())
}

#[derive(Debug)]
struct TableEntry {
    name: String,
    is_view: bool,
}

#[derive(Debug)]
struct ColumnEntry {
    name: String,
    default: Option<String>,
}

fn strip_default(raw: Option<String>) -> Option<String> {
    raw.map(|d| {
        let trimmed = d.trim();
        let unquoted = trimmed
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .map(|s| s.replace("''", "'"))
            .or_else(|| {
                trimmed
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .map(str::to_string)
            });
        unquoted.unwrap_or_else(|| trimmed.to_string())
    })
}

// =============================================================================
// SCHEMA
// =============================================================================

/// Feature inventory of one attached catalog.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Logical catalog name (also its attach alias).
    pub name: String,
    /// Backing file; `None` for the in-memory imported catalog.
    pub path: Option<PathBuf>,
    pub context: Context,
    features: Vec<FeatureInfo>,
    tables: BTreeSet<String>,
}

impl Schema {
    /// Schema of an attached catalog, creating missing main tables and
    /// hash-propagation triggers.
    pub(crate) fn load(
        conn: &Connection,
        name: &str,
        path: Option<PathBuf>,
        contexts: &Contexts,
    ) -> Result<Self> {
        let mut schema = Self {
            name: name.to_string(),
            path,
            context: contexts.context_from_name(name),
            features: Vec::new(),
            tables: BTreeSet::new(),
        };
        schema.introspect(conn, contexts)?;
        if !schema.is_in_memory() && schema.ensure_main_tables(conn)? {
            schema.introspect(conn, contexts)?;
        }
        Ok(schema)
    }

    /// Empty schema of the in-memory catalog for imported tabular files.
    pub(crate) fn imported(name: &str, contexts: &Contexts) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            context: contexts.context_from_name(name),
            features: Vec::new(),
            tables: BTreeSet::new(),
        }
    }

    #[must_use]
    pub const fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    /// Feature bindings in load order (main tables last).
    #[must_use]
    pub fn features(&self) -> &[FeatureInfo] {
        &self.features
    }

    /// Binding of bare `name` in context `ctx`.
    #[must_use]
    pub fn get(&self, name: &str, ctx: Context) -> Option<&FeatureInfo> {
        self.features
            .iter()
            .find(|f| f.name == name && f.context == ctx)
    }

    #[must_use]
    pub fn has_feature(&self, name: &str, ctx: Context) -> bool {
        self.get(name, ctx).is_some()
    }

    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Contexts with at least one table in this catalog.
    #[must_use]
    pub fn contexts(&self) -> BTreeSet<Context> {
        self.features.iter().map(|f| f.context).collect()
    }

    /// Physical table name of bare `name` in context `ctx`.
    #[must_use]
    pub fn table_name(&self, name: &str, ctx: Context) -> String {
        if ctx == self.context {
            name.to_string()
        } else {
            format!("{}_{}", ctx.name(), name)
        }
    }

    /// Main table of context `ctx`.
    #[must_use]
    pub fn main_table(&self, ctx: Context) -> String {
        self.table_name(MAIN_TABLE, ctx)
    }

    /// Context and bare name of a physical table.
    #[must_use]
    pub fn table_context(&self, table: &str, contexts: &Contexts) -> (Context, String) {
        match contexts.split_prefixed(table) {
            Some((ctx, rest)) => (ctx, rest.to_string()),
            None => (self.context, table.to_string()),
        }
    }

    // =========================================================================
    // INTROSPECTION
    // =========================================================================

    fn list_tables(&self, conn: &Connection) -> Result<Vec<TableEntry>> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master WHERE type IN ('table', 'view') ORDER BY name",
            self.name
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok(TableEntry {
                name,
                is_view: kind == "view",
            })
        })?;
        let mut tables = Vec::new();
        for row in rows {
            let entry = row?;
            if !entry.name.starts_with('_') && !entry.name.starts_with("sqlite_") {
                tables.push(entry);
            }
        }
        Ok(tables)
    }

    fn list_columns(&self, conn: &Connection, table: &str) -> Result<Vec<ColumnEntry>> {
        let sql = format!("PRAGMA {}.table_info({})", self.name, sql_literal(table));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(ColumnEntry {
                name: row.get(1)?,
                default: row.get(4)?,
            })
        })?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        Ok(columns)
    }

    fn introspect(&mut self, conn: &Connection, contexts: &Contexts) -> Result<()> {
        let mut tables = self.list_tables(conn)?;
        let is_main = |schema: &Self, t: &TableEntry| {
            let (ctx, bare) = schema.table_context(&t.name, contexts);
            !t.is_view && bare == MAIN_TABLE && schema.table_name(MAIN_TABLE, ctx) == t.name
        };
        // main tables last
        tables.sort_by_key(|t| (is_main(self, t), t.name.clone()));

        self.tables = tables.iter().map(|t| t.name.clone()).collect();
        self.features.clear();

        for table in &tables {
            let (ctx, bare) = self.table_context(&table.name, contexts);
            let columns = self.list_columns(conn, &table.name)?;
            if is_main(self, table) {
                self.introspect_main(table, ctx, columns);
            } else {
                self.introspect_table(table, ctx, &bare, columns)?;
            }
        }
        debug!(
            catalog = %self.name,
            features = self.features.len(),
            "Schema loaded"
        );
        Ok(())
    }

    fn introspect_main(
        &mut self,
        table: &TableEntry,
        ctx: Context,
        columns: Vec<ColumnEntry>,
    ) {
        for column in columns {
            if column.name == "hash" {
                self.features.push(FeatureInfo {
                    name: "hash".to_string(),
                    database: self.name.clone(),
                    context: ctx,
                    table: table.name.clone(),
                    column: column.name,
                    default: None,
                    is_virtual: false,
                    main: true,
                    fk: None,
                });
                continue;
            }
            let referenced = self.table_name(&column.name, ctx);
            if self.tables.contains(&referenced) {
                // foreign key of a multi-valued feature
                if let Some(f) = self
                    .features
                    .iter_mut()
                    .find(|f| f.table == referenced && f.column == "value")
                {
                    f.fk = Some(column.name);
                }
                continue;
            }
            self.features.push(FeatureInfo {
                name: column.name.clone(),
                database: self.name.clone(),
                context: ctx,
                table: table.name.clone(),
                column: column.name,
                default: strip_default(column.default),
                is_virtual: false,
                main: true,
                fk: None,
            });
        }
    }

    fn introspect_table(
        &mut self,
        table: &TableEntry,
        ctx: Context,
        bare: &str,
        columns: Vec<ColumnEntry>,
    ) -> Result<()> {
        let names: BTreeSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        if !table.is_view && names != BTreeSet::from(["hash", "value"]) {
            return Err(GbdError::Schema(format!(
                "Table '{}.{}' must have exactly the columns 'hash' and 'value'",
                self.name, table.name
            )));
        }
        for column in columns {
            let name = match column.name.as_str() {
                "hash" => "hash".to_string(),
                "value" => bare.to_string(),
                other => other.to_string(),
            };
            self.features.push(FeatureInfo {
                name,
                database: self.name.clone(),
                context: ctx,
                table: table.name.clone(),
                column: column.name,
                default: None,
                is_virtual: table.is_view,
                main: false,
                fk: None,
            });
        }
        Ok(())
    }

    // =========================================================================
    // MAIN TABLES
    // =========================================================================

    fn has_trigger(&self, conn: &Connection, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT count(*) FROM {}.sqlite_master WHERE type = 'trigger' AND tbl_name = ?1",
            self.name
        );
        let count: i64 = conn.query_row(&sql, [table], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Create the main table of `ctx` if missing, back-filling known hashes.
    pub(crate) fn create_main_table(&self, conn: &Connection, ctx: Context) -> Result<()> {
        let main = self.main_table(ctx);
        if self.tables.contains(&main) {
            return Ok(());
        }
        debug!(catalog = %self.name, table = %main, "Creating main table");
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (hash UNIQUE NOT NULL)",
            self.name, main
        ))?;
        Ok(())
    }

    /// Trigger propagating new hashes of `table` into the main table of `ctx`.
    pub(crate) fn create_hash_trigger(
        &self,
        conn: &Connection,
        table: &str,
        ctx: Context,
    ) -> Result<()> {
        let main = self.main_table(ctx);
        conn.execute_batch(&format!(
            "CREATE TRIGGER IF NOT EXISTS {db}.{table}_hash AFTER INSERT ON {table} \
             BEGIN INSERT OR IGNORE INTO {main} (hash) VALUES (NEW.hash); END",
            db = self.name,
        ))?;
        Ok(())
    }

    /// Ensure the catalog's own context and each context with tables have
    /// their main table and triggers. Returns `true` if anything was created.
    fn ensure_main_tables(&self, conn: &Connection) -> Result<bool> {
        let mut changed = false;
        let mut contexts = self.contexts();
        contexts.insert(self.context);
        for ctx in contexts {
            let main = self.main_table(ctx);
            let owned: Vec<&FeatureInfo> = self
                .features
                .iter()
                .filter(|f| f.context == ctx && !f.main && !f.is_virtual && f.column == "value")
                .collect();
            if !self.tables.contains(&main) {
                self.create_main_table(conn, ctx)?;
                for f in &owned {
                    conn.execute_batch(&format!(
                        "INSERT OR IGNORE INTO {db}.{main} (hash) SELECT DISTINCT(hash) FROM {db}.{table} WHERE hash != {none}",
                        db = self.name,
                        table = f.table,
                        none = sql_literal(NONE_SENTINEL),
                    ))?;
                }
                changed = true;
            }
            for f in owned {
                if !self.has_trigger(conn, &f.table)? {
                    self.create_hash_trigger(conn, &f.table, ctx)?;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    // =========================================================================
    // IMPORTED TABULAR FILES
    // =========================================================================

    /// Load a comma-delimited file with a `hash` header column into this
    /// (in-memory) catalog as one table of virtual features.
    pub(crate) fn import_csv(
        &mut self,
        conn: &Connection,
        path: &Path,
        contexts: &Contexts,
    ) -> Result<()> {
        let table = dbname_from_path(path);
        if self.tables.contains(&table) {
            return Err(GbdError::Configuration(format!(
                "Tabular file '{}' collides with an already imported table '{table}'",
                path.display()
            )));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(path)?;
        let columns: Vec<String> = reader.headers()?.iter().map(sanitize_column).collect();
        if !columns.iter().any(|c| c == "hash") {
            return Err(GbdError::Configuration(format!(
                "Column 'hash' not found in '{}'",
                path.display()
            )));
        }
        let unique: BTreeSet<&String> = columns.iter().collect();
        if unique.len() != columns.len() {
            return Err(GbdError::Configuration(format!(
                "Duplicate column names in '{}'",
                path.display()
            )));
        }

        conn.execute_batch(&format!(
            "CREATE TABLE {}.{} ({})",
            self.name,
            table,
            columns
                .iter()
                .map(|c| format!("{c} TEXT"))
                .collect::<Vec<_>>()
                .join(", ")
        ))?;
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {}.{} VALUES ({placeholders})",
            self.name, table
        ))?;
        for record in reader.records() {
            let record = record?;
            stmt.execute(rusqlite::params_from_iter(record.iter()))?;
        }

        let (ctx, _) = self.table_context(&table, contexts);
        for column in columns {
            let name = column.clone();
            self.features.push(FeatureInfo {
                name,
                database: self.name.clone(),
                context: ctx,
                table: table.clone(),
                column,
                default: None,
                is_virtual: true,
                main: false,
                fk: None,
            });
        }
        self.tables.insert(table);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached(dir: &Path, file: &str) -> (Connection, String, PathBuf) {
        let path = dir.join(file);
        let name = dbname_from_path(&path);
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            &format!("ATTACH DATABASE ?1 AS {name}"),
            [path.to_string_lossy().as_ref()],
        )
        .expect("attach");
        (conn, name, path)
    }

    #[test]
    fn dbname_sanitization() {
        assert_eq!(dbname_from_path(Path::new("/x/meta-data.db")), "meta_data");
        assert_eq!(dbname_from_path(Path::new("2023.db")), "cnf_2023");
        assert_eq!(dbname_from_path(Path::new("kis.tar.db")), "kis_tar");
    }

    #[test]
    fn feature_name_validation() {
        let contexts = Contexts::builtin();
        assert!(valid_feature_or_raise("runtime", &contexts).is_ok());
        assert!(valid_feature_or_raise("clauses_horn", &contexts).is_ok());
        for bad in ["hash", "local", "select", "sqlite_x", "__x", "1abc", "a", "a-b", "kis_x"] {
            let err = valid_feature_or_raise(bad, &contexts).expect_err(bad);
            assert_eq!(err.kind(), "SchemaError", "{bad}");
        }
    }

    #[test]
    fn is_database_checks_magic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let empty = dir.path().join("empty.db");
        std::fs::write(&empty, b"").expect("write");
        assert!(is_database(&empty).expect("empty"));

        let short = dir.path().join("short.csv");
        std::fs::write(&short, b"hash,family\n").expect("write");
        assert!(!is_database(&short).expect("short"));

        let long = dir.path().join("long.csv");
        std::fs::write(&long, "hash,family\n".repeat(20)).expect("write");
        assert!(!is_database(&long).expect("long"));
    }

    #[test]
    fn strips_quoted_defaults() {
        assert_eq!(strip_default(Some("'unknown'".into())).as_deref(), Some("unknown"));
        assert_eq!(strip_default(Some("\"x\"".into())).as_deref(), Some("x"));
        assert_eq!(strip_default(Some("'it''s'".into())).as_deref(), Some("it's"));
        assert_eq!(strip_default(Some("None".into())).as_deref(), Some("None"));
        assert_eq!(strip_default(None), None);
    }

    #[test]
    fn introspects_main_and_multi_valued_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (conn, name, path) = attached(dir.path(), "meta.db");
        conn.execute_batch(&format!(
            "CREATE TABLE {name}.features (hash UNIQUE NOT NULL, family TEXT NOT NULL DEFAULT 'unknown', runtime TEXT NOT NULL DEFAULT 'None');
             CREATE TABLE {name}.runtime (hash TEXT NOT NULL, value TEXT NOT NULL, CONSTRAINT all_unique UNIQUE(hash, value));"
        ))
        .expect("create");

        let contexts = Contexts::builtin();
        let schema = Schema::load(&conn, &name, Some(path), &contexts).expect("load");
        assert_eq!(schema.context, Context::Cnf);

        let family = schema.get("family", Context::Cnf).expect("family");
        assert!(family.is_unique());
        assert_eq!(family.default.as_deref(), Some("unknown"));

        let runtime = schema.get("runtime", Context::Cnf).expect("runtime");
        assert!(!runtime.main);
        assert_eq!(runtime.column, "value");
        assert_eq!(runtime.fk.as_deref(), Some("runtime"));

        // main table is processed last
        let last = schema.features().last().expect("features");
        assert!(last.main);

        // trigger was created for the pre-existing multi-valued table
        assert!(schema.has_trigger(&conn, "runtime").expect("trigger"));
    }

    #[test]
    fn rejects_malformed_multi_valued_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (conn, name, path) = attached(dir.path(), "bad.db");
        conn.execute_batch(&format!("CREATE TABLE {name}.runtime (hash TEXT, value TEXT, extra TEXT)"))
            .expect("create");
        let err = Schema::load(&conn, &name, Some(path), &Contexts::builtin()).expect_err("bad");
        assert_eq!(err.kind(), "SchemaError");
    }

    #[test]
    fn creates_missing_main_table_with_backfill() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (conn, name, path) = attached(dir.path(), "legacy.db");
        conn.execute_batch(&format!(
            "CREATE TABLE {name}.kis_nodes (hash TEXT NOT NULL, value TEXT NOT NULL);
             INSERT INTO {name}.kis_nodes VALUES ('k1', '10'), ('k2', '20');"
        ))
        .expect("create");
        let schema = Schema::load(&conn, &name, Some(path), &Contexts::builtin()).expect("load");
        assert!(schema.has_table("kis_features"));
        let hash = schema.get("hash", Context::Kis).expect("hash");
        assert!(hash.is_main_hash() || hash.table == "kis_nodes");
        let count: i64 = conn
            .query_row(&format!("SELECT count(*) FROM {name}.kis_features"), [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
        let nodes = schema.get("nodes", Context::Kis).expect("nodes");
        assert_eq!(nodes.table, "kis_nodes");
    }

    #[test]
    fn empty_catalog_gets_own_main_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (conn, name, path) = attached(dir.path(), "kis_meta.db");
        let schema = Schema::load(&conn, &name, Some(path), &Contexts::builtin()).expect("load");
        assert_eq!(schema.context, Context::Kis);
        assert!(schema.has_table("features"));
        let hash = schema.get("hash", Context::Kis).expect("hash");
        assert!(hash.is_main_hash());
        assert_eq!(schema.features().len(), 1);
    }

    #[test]
    fn legacy_column_names_load_as_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (conn, name, path) = attached(dir.path(), "meta.db");
        conn.execute_batch(&format!(
            "CREATE TABLE {name}.features (hash UNIQUE NOT NULL, x TEXT NOT NULL DEFAULT 'None');
             CREATE TABLE {name}.y (hash TEXT NOT NULL, value TEXT NOT NULL);"
        ))
        .expect("create");
        let schema = Schema::load(&conn, &name, Some(path), &Contexts::builtin()).expect("load");
        assert!(schema.get("x", Context::Cnf).expect("x").is_unique());
        assert!(!schema.get("y", Context::Cnf).expect("y").main);
    }

    #[test]
    fn imports_csv_as_virtual_features() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("results.csv");
        std::fs::write(&csv_path, "hash,solver time,2nd\nh1,1.5,a\nh2,2.5,b\n").expect("write");
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("ATTACH DATABASE ':memory:' AS imported").expect("attach");
        let contexts = Contexts::builtin();
        let mut schema = Schema::imported("imported", &contexts);
        schema.import_csv(&conn, &csv_path, &contexts).expect("import");

        let time = schema.get("solver_time", Context::Cnf).expect("column");
        assert!(time.is_virtual);
        assert_eq!(time.table, "results");
        assert!(schema.get("f_2nd", Context::Cnf).is_some());
        let count: i64 = conn
            .query_row("SELECT count(*) FROM imported.results", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn csv_without_hash_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let csv_path = dir.path().join("nohash.csv");
        std::fs::write(&csv_path, "name,family\nx,y\n").expect("write");
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch("ATTACH DATABASE ':memory:' AS imported").expect("attach");
        let contexts = Contexts::builtin();
        let mut schema = Schema::imported("imported", &contexts);
        let err = schema.import_csv(&conn, &csv_path, &contexts).expect_err("no hash");
        assert_eq!(err.kind(), "ConfigurationError");
    }
}
