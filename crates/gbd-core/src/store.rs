//! # Federated Store
//!
//! One SQLite connection with every catalog attached under its logical
//! name. The first catalog is the default write target.
//!
//! Imported tabular files are loaded into a single private in-memory
//! catalog named `imported`.
//!
//! ## Feature precedence
//!
//! Bindings of a feature name are kept in catalog order, and within a
//! catalog in schema load order (main tables last). Unqualified names
//! resolve to the first binding, except that `hash` prefers the `hash`
//! column of a main table. `db:name` and `ctx:name` select an explicit
//! binding; a catalog qualifier wins over a context qualifier of the same
//! spelling.

use crate::context::{Context, Contexts};
use crate::primitives::{IMPORTED_CATALOG, MUTATION_SAVEPOINT};
use crate::schema::{FeatureInfo, Schema, dbname_from_path, is_database};
use crate::types::{GbdError, Result, Value};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Query session over a federation of catalogs.
pub struct Database {
    conn: Connection,
    contexts: Contexts,
    schemas: BTreeMap<String, Schema>,
    /// Catalog names in precedence order.
    order: Vec<String>,
    /// Bare feature name -> bindings in precedence order.
    index: BTreeMap<String, Vec<FeatureInfo>>,
    autocommit: bool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("catalogs", &self.order)
            .field("autocommit", &self.autocommit)
            .finish()
    }
}

impl Database {
    /// Attach `paths` in order. Missing catalog files are created empty.
    pub fn open(paths: &[PathBuf], contexts: Contexts) -> Result<Self> {
        if paths.is_empty() {
            return Err(GbdError::Configuration(
                "No catalogs given (set GBD_DB or pass --db)".to_string(),
            ));
        }
        let conn = Connection::open_in_memory()?;
        let mut db = Self {
            conn,
            contexts,
            schemas: BTreeMap::new(),
            order: Vec::new(),
            index: BTreeMap::new(),
            autocommit: true,
        };
        for path in paths {
            db.attach(path)?;
        }
        db.rebuild_index()?;
        Ok(db)
    }

    fn attach(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            info!(path = %path.display(), "Creating new catalog");
            std::fs::File::create(path).map_err(|e| {
                GbdError::Configuration(format!(
                    "Unable to create catalog '{}': {e}",
                    path.display()
                ))
            })?;
        }
        if !path.is_file() {
            return Err(GbdError::Configuration(format!(
                "Catalog path '{}' is not a file",
                path.display()
            )));
        }
        let is_db = is_database(path).map_err(|e| {
            GbdError::Configuration(format!("Catalog '{}' is unreadable: {e}", path.display()))
        })?;
        if is_db {
            self.attach_catalog(path)
        } else {
            self.import_tabular(path)
        }
    }

    fn attach_catalog(&mut self, path: &Path) -> Result<()> {
        let name = dbname_from_path(path);
        if name == IMPORTED_CATALOG || self.schemas.contains_key(&name) {
            return Err(GbdError::Configuration(format!(
                "Catalog name '{name}' of '{}' is already in use",
                path.display()
            )));
        }
        self.conn.execute(
            &format!("ATTACH DATABASE ?1 AS {name}"),
            [path.to_string_lossy().as_ref()],
        )?;
        let schema = Schema::load(&self.conn, &name, Some(path.to_path_buf()), &self.contexts)?;
        debug!(catalog = %name, path = %path.display(), "Attached catalog");
        self.schemas.insert(name.clone(), schema);
        self.order.push(name);
        Ok(())
    }

    fn import_tabular(&mut self, path: &Path) -> Result<()> {
        if !self.schemas.contains_key(IMPORTED_CATALOG) {
            self.conn
                .execute_batch(&format!("ATTACH DATABASE ':memory:' AS {IMPORTED_CATALOG}"))?;
            self.schemas.insert(
                IMPORTED_CATALOG.to_string(),
                Schema::imported(IMPORTED_CATALOG, &self.contexts),
            );
            self.order.push(IMPORTED_CATALOG.to_string());
        }
        if let Some(schema) = self.schemas.get_mut(IMPORTED_CATALOG) {
            schema.import_csv(&self.conn, path, &self.contexts)?;
        }
        debug!(path = %path.display(), "Imported tabular file");
        Ok(())
    }

    fn rebuild_index(&mut self) -> Result<()> {
        let mut index: BTreeMap<String, Vec<FeatureInfo>> = BTreeMap::new();
        for name in &self.order {
            if let Some(schema) = self.schemas.get(name) {
                for feature in schema.features() {
                    index
                        .entry(feature.name.clone())
                        .or_default()
                        .push(feature.clone());
                }
            }
        }
        check_unique_defaults(&index)?;
        self.index = index;
        Ok(())
    }

    /// Reload the schema of catalog `db` after a mutation.
    pub(crate) fn refresh(&mut self, db: &str) -> Result<()> {
        let Some(schema) = self.schemas.get(db) else {
            return Err(GbdError::Configuration(format!("Catalog '{db}' not found")));
        };
        if schema.is_in_memory() {
            return Ok(());
        }
        let reloaded = Schema::load(&self.conn, db, schema.path.clone(), &self.contexts)?;
        self.schemas.insert(db.to_string(), reloaded);
        self.rebuild_index()
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn contexts(&self) -> &Contexts {
        &self.contexts
    }

    /// Catalog names in precedence order.
    #[must_use]
    pub fn databases(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Catalogs of context `ctx`, in precedence order.
    #[must_use]
    pub fn databases_of(&self, ctx: Context) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.schemas.get(*name).is_some_and(|s| s.context == ctx))
            .map(String::as_str)
            .collect()
    }

    /// Default write target: the first on-disk catalog.
    pub fn maindb(&self) -> Result<&str> {
        self.order
            .iter()
            .find(|name| self.schemas.get(*name).is_some_and(|s| !s.is_in_memory()))
            .map(String::as_str)
            .ok_or_else(|| GbdError::Configuration("No writable catalog attached".to_string()))
    }

    pub fn schema(&self, db: &str) -> Result<&Schema> {
        self.schemas
            .get(db)
            .ok_or_else(|| GbdError::Configuration(format!("Catalog '{db}' not found")))
    }

    /// File path of catalog `db` (`None` for the imported catalog).
    pub fn dpath(&self, db: &str) -> Result<Option<&Path>> {
        Ok(self.schema(db)?.path.as_deref())
    }

    pub fn dcontext(&self, db: &str) -> Result<Context> {
        Ok(self.schema(db)?.context)
    }

    /// Writable catalog `target`, or the default write target.
    pub fn target_db(&self, target: Option<&str>) -> Result<String> {
        let name = match target {
            Some(t) => t.to_string(),
            None => self.maindb()?.to_string(),
        };
        if self.schema(&name)?.is_in_memory() {
            return Err(GbdError::Configuration(format!(
                "Catalog '{name}' is read-only"
            )));
        }
        Ok(name)
    }

    // =========================================================================
    // FEATURE RESOLUTION
    // =========================================================================

    /// All bindings of bare `name` in precedence order.
    #[must_use]
    pub fn bindings(&self, name: &str) -> &[FeatureInfo] {
        self.index.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// The winning binding of every feature name.
    #[must_use]
    pub fn features(&self) -> Vec<&FeatureInfo> {
        self.index.values().filter_map(|b| pick(b.iter())).collect()
    }

    /// Resolve `name`, `db:name` or `ctx:name` to its binding.
    pub fn find(&self, fid: &str) -> Result<&FeatureInfo> {
        let not_found = || GbdError::Resolution(format!("Feature '{fid}' not found"));
        match fid.split_once(':') {
            None => pick(self.bindings(fid).iter()).ok_or_else(not_found),
            Some((qualifier, name)) => {
                let bindings = self.bindings(name).iter();
                if self.schemas.contains_key(qualifier) {
                    pick(bindings.filter(|f| f.database == qualifier)).ok_or_else(not_found)
                } else if let Some(ctx) = self.contexts.lookup(qualifier) {
                    pick(bindings.filter(|f| f.context == ctx)).ok_or_else(not_found)
                } else {
                    Err(GbdError::Resolution(format!(
                        "Unknown catalog or context '{qualifier}' in '{fid}'"
                    )))
                }
            }
        }
    }

    /// Binding of `fid` (`name` or `ctx:name`) inside catalog `db`.
    pub fn find_in(&self, fid: &str, db: &str) -> Result<Option<&FeatureInfo>> {
        let schema = self.schema(db)?;
        let (ctx, name) = match fid.split_once(':') {
            Some((qualifier, name)) => (Some(self.contexts.parse(qualifier)?), name),
            None => (None, fid),
        };
        let bindings = self.bindings(name).iter().filter(|f| f.database == db);
        Ok(match ctx {
            Some(ctx) => pick(bindings.filter(|f| f.context == ctx)),
            None => {
                let preferred = schema.context;
                let all: Vec<&FeatureInfo> = bindings.collect();
                pick(all.iter().copied().filter(|f| f.context == preferred))
                    .or_else(|| pick(all.into_iter()))
            }
        })
    }

    // =========================================================================
    // STATEMENTS
    // =========================================================================

    /// Run a SELECT and materialize every row.
    pub fn query_rows(&self, sql: &str) -> Result<Vec<Vec<Value>>> {
        debug!(%sql, "query");
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(Value::from(row.get_ref(i)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    /// Whether writes are committed after every mutation.
    #[must_use]
    pub const fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Switch autocommit; turning it back on commits pending work.
    pub fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        if autocommit && !self.autocommit {
            self.commit()?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    /// Commit pending work when autocommit is off.
    pub fn commit(&mut self) -> Result<()> {
        if !self.conn.is_autocommit() {
            debug!("COMMIT");
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Commit pending work and close the connection.
    ///
    /// Dropping a `Database` without closing it rolls pending work back.
    pub fn close(mut self) -> Result<()> {
        self.commit()
    }

    /// Run the value write `op` inside a savepoint on catalog `db`; roll
    /// back on error. The schema is left as loaded.
    pub(crate) fn atomically<T>(
        &mut self,
        db: &str,
        op: impl FnOnce(&Connection, &Schema) -> Result<T>,
    ) -> Result<T> {
        if !self.autocommit && self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        let schema = self
            .schemas
            .get(db)
            .ok_or_else(|| GbdError::Configuration(format!("Catalog '{db}' not found")))?;
        self.conn
            .execute_batch(&format!("SAVEPOINT {MUTATION_SAVEPOINT}"))?;
        match op(&self.conn, schema) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {MUTATION_SAVEPOINT}"))?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "Rolling back mutation");
                self.conn.execute_batch(&format!(
                    "ROLLBACK TO {MUTATION_SAVEPOINT}; RELEASE {MUTATION_SAVEPOINT}"
                ))?;
                Err(err)
            }
        }
    }

    /// Like [`Self::atomically`] for operations that change tables or
    /// columns of `db`; reloads its schema on success.
    pub(crate) fn restructure<T>(
        &mut self,
        db: &str,
        op: impl FnOnce(&Connection, &Schema) -> Result<T>,
    ) -> Result<T> {
        let value = self.atomically(db, op)?;
        self.refresh(db)?;
        Ok(value)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            tracing::warn!("Rolling back uncommitted work");
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                tracing::error!(error = %err, "Failed to roll back pending work");
            }
        }
    }
}

/// First binding, except that `hash` prefers a main-table `hash` column.
fn pick<'a>(mut bindings: impl Iterator<Item = &'a FeatureInfo> + Clone) -> Option<&'a FeatureInfo> {
    bindings
        .clone()
        .find(|f| f.is_main_hash())
        .or_else(|| bindings.next())
}

/// Unique features of the same context must agree on their default.
fn check_unique_defaults(index: &BTreeMap<String, Vec<FeatureInfo>>) -> Result<()> {
    for bindings in index.values() {
        let mut seen: BTreeMap<Context, &FeatureInfo> = BTreeMap::new();
        for f in bindings.iter().filter(|f| f.is_unique()) {
            match seen.get(&f.context) {
                Some(first) if first.default != f.default => {
                    return Err(GbdError::Schema(format!(
                        "Unique feature '{}' has conflicting defaults in catalogs '{}' ({:?}) and '{}' ({:?})",
                        f.qualified_name(),
                        first.database,
                        first.default,
                        f.database,
                        f.default
                    )));
                }
                Some(_) => {}
                None => {
                    seen.insert(f.context, f);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(paths: &[PathBuf]) -> Database {
        Database::open(paths, Contexts::builtin()).expect("open")
    }

    #[test]
    fn empty_catalog_list_is_configuration_error() {
        let err = Database::open(&[], Contexts::builtin()).expect_err("empty");
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn creates_missing_catalog_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("new.db");
        let db = open(&[path.clone()]);
        assert!(path.exists());
        assert_eq!(db.databases(), vec!["new"]);
        assert_eq!(db.maindb().expect("main"), "new");
    }

    #[test]
    fn duplicate_catalog_names_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("a")).expect("mkdir");
        let first = dir.path().join("meta.db");
        let second = dir.path().join("a").join("meta.db");
        let err = Database::open(&[first, second], Contexts::builtin()).expect_err("dup");
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn precedence_follows_catalog_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("first.db");
        let b = dir.path().join("second.db");
        for (path, default) in [(&a, "x"), (&b, "x")] {
            let conn = Connection::open(path).expect("open");
            conn.execute_batch(&format!(
                "CREATE TABLE features (hash UNIQUE NOT NULL, family TEXT NOT NULL DEFAULT '{default}');
                 CREATE TABLE runtime (hash TEXT NOT NULL, value TEXT NOT NULL);"
            ))
            .expect("create");
        }
        let db = open(&[b.clone(), a.clone()]);
        assert_eq!(db.find("family").expect("family").database, "second");
        assert_eq!(db.find("runtime").expect("runtime").database, "second");
        assert_eq!(db.find("first:family").expect("qualified").database, "first");
        assert_eq!(db.find("cnf:runtime").expect("ctx").database, "second");

        let hash = db.find("hash").expect("hash");
        assert!(hash.is_main_hash());
        assert_eq!(hash.database, "second");
        assert!(db.find("nothing").is_err());
        assert!(db.find("nowhere:family").is_err());
    }

    #[test]
    fn conflicting_unique_defaults_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a.db");
        let b = dir.path().join("b.db");
        for (path, default) in [(&a, "x"), (&b, "y")] {
            let conn = Connection::open(path).expect("open");
            conn.execute_batch(&format!(
                "CREATE TABLE features (hash UNIQUE NOT NULL, family TEXT NOT NULL DEFAULT '{default}')"
            ))
            .expect("create");
        }
        let err = Database::open(&[a, b], Contexts::builtin()).expect_err("conflict");
        assert_eq!(err.kind(), "SchemaError");
    }

    #[test]
    fn imported_tables_are_unioned() {
        let dir = tempfile::tempdir().expect("tempdir");
        let catalog = dir.path().join("meta.db");
        let one = dir.path().join("one.csv");
        let two = dir.path().join("two.csv");
        std::fs::write(&one, "hash,score\nh1,1\n").expect("write");
        std::fs::write(&two, "hash,track\nh1,main\n").expect("write");
        let db = open(&[catalog, one, two]);
        assert_eq!(db.databases(), vec!["meta", "imported"]);
        assert_eq!(db.find("score").expect("score").table, "one");
        assert_eq!(db.find("track").expect("track").table, "two");
        assert!(db.target_db(Some("imported")).is_err());
        assert_eq!(db.target_db(None).expect("target"), "meta");
    }
}
