//! # Initialization Jobs
//!
//! Catalog population on top of the extraction runner: register benchmark
//! files found under a directory, extract features of registered
//! instances, and transform instances into another context.

use crate::context::Context;
use crate::extractors::{LocalHasher, lookup};
use crate::primitives::NONE_SENTINEL;
use crate::query::{Collapse, QuerySpec};
use crate::runner::{RunOptions, RunSummary, TaskFunction, run};
use crate::session::Session;
use crate::types::{GbdError, Result, Task};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Register benchmark files under `root` in the target catalog.
///
/// Paths of `<ctx>:local` whose files no longer exist are removed first.
/// Only files not yet registered are hashed. `ctx` defaults to the target
/// catalog's context.
pub fn init_local(
    session: &mut Session,
    root: &Path,
    ctx: Option<Context>,
    options: &RunOptions,
) -> Result<RunSummary> {
    let db = session.database().target_db(options.target.as_deref())?;
    let ctx = match ctx {
        Some(ctx) => ctx,
        None => session.database().dcontext(&db)?,
    };
    let local = format!("{ctx}:local");
    session
        .database_mut()
        .create_feature(&local, None, Some(&db), true)?;

    let known = registered_paths(session, &local, &db)?;
    let stale: Vec<String> = known
        .iter()
        .filter(|p| !Path::new(p.as_str()).is_file())
        .cloned()
        .collect();
    if !stale.is_empty() {
        info!(count = stale.len(), "Removing stale local entries");
        session.reset_values(&local, &stale, &[], Some(&db))?;
    }

    let contexts = session.database().contexts().clone();
    let mut tasks = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| GbdError::Io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if contexts.get_context_by_suffix(path).ok() != Some(ctx) {
            continue;
        }
        if !known.contains(path.to_string_lossy().as_ref()) {
            tasks.push(Task::new(None, path));
        }
    }
    info!(root = %root.display(), context = %ctx, new = tasks.len(), "Registering benchmarks");

    let options = RunOptions {
        target: Some(db),
        permissive: true,
        ..options.clone()
    };
    run(
        session.database_mut(),
        &tasks,
        &LocalHasher::new(ctx),
        &options,
    )
}

/// Run the registered extractor `name` over instances matching `query`
/// and `hashes`.
pub fn init_features(
    session: &mut Session,
    name: &str,
    query: Option<&str>,
    hashes: &[String],
    options: &RunOptions,
) -> Result<RunSummary> {
    let func = registered(name)?;
    if func.target_context().is_some() {
        return Err(GbdError::Configuration(format!(
            "'{name}' is a transformer; use transform"
        )));
    }
    let db = session.database().target_db(options.target.as_deref())?;
    execute(session, func.as_ref(), query, hashes, db, options)
}

/// Run the registered transformer `name` over instances matching `query`
/// and `hashes`, recording new instances in a catalog of the target
/// context.
pub fn transform(
    session: &mut Session,
    name: &str,
    query: Option<&str>,
    hashes: &[String],
    options: &RunOptions,
) -> Result<RunSummary> {
    let func = registered(name)?;
    let Some(target_ctx) = func.target_context() else {
        return Err(GbdError::Configuration(format!(
            "'{name}' is not a transformer"
        )));
    };
    let db = match options.target.as_deref() {
        Some(target) => session.database().target_db(Some(target))?,
        None => session
            .database()
            .databases_of(target_ctx)
            .first()
            .map(|d| (*d).to_string())
            .ok_or_else(|| {
                GbdError::Configuration(format!(
                    "No catalog of context '{target_ctx}' attached"
                ))
            })?,
    };
    execute(session, func.as_ref(), query, hashes, db, options)
}

fn registered(name: &str) -> Result<Box<dyn TaskFunction>> {
    lookup(name).ok_or_else(|| GbdError::Configuration(format!("Unknown extractor '{name}'")))
}

/// Create the function's features in `db`, then run it over the local
/// paths of the selected instances.
fn execute(
    session: &mut Session,
    func: &dyn TaskFunction,
    query: Option<&str>,
    hashes: &[String],
    db: String,
    options: &RunOptions,
) -> Result<RunSummary> {
    for (feature, default) in func.features() {
        session
            .database_mut()
            .create_feature(&feature, default.as_deref(), Some(&db), true)?;
    }
    let ctx = func
        .source_context()
        .unwrap_or_else(|| session.database().contexts().default_context());
    let tasks = local_tasks(session, ctx, query, hashes)?;
    info!(function = func.name(), tasks = tasks.len(), catalog = %db, "Running extractor");
    let options = RunOptions {
        target: Some(db),
        permissive: true,
        ..options.clone()
    };
    run(session.database_mut(), &tasks, func, &options)
}

/// One task per selected hash of context `ctx`, using its first local path.
fn local_tasks(
    session: &Session,
    ctx: Context,
    query: Option<&str>,
    hashes: &[String],
) -> Result<Vec<Task>> {
    let spec = QuerySpec {
        query: query.map(str::to_string),
        hashes: hashes.to_vec(),
        resolve: vec![format!("{ctx}:local")],
        group_by: Some(format!("{ctx}:hash")),
        collapse: Collapse::Min,
        ..QuerySpec::default()
    };
    let result = session.query(&spec)?;
    let mut tasks = Vec::with_capacity(result.len());
    for row in &result.rows {
        let hash = row.first().and_then(crate::Value::as_text);
        let path = row.get(1).and_then(crate::Value::as_text);
        match (hash, path) {
            (Some(hash), Some(path)) if path != NONE_SENTINEL => {
                tasks.push(Task::new(Some(hash), PathBuf::from(path)));
            }
            (Some(hash), _) => warn!(%hash, "No local path registered"),
            _ => {}
        }
    }
    Ok(tasks)
}

/// Distinct values of `local` stored in catalog `db`.
fn registered_paths(session: &Session, local: &str, db: &str) -> Result<BTreeSet<String>> {
    let database = session.database();
    let Some(finfo) = database.find_in(local, db)? else {
        return Ok(BTreeSet::new());
    };
    let rows = database.query_rows(&format!(
        "SELECT DISTINCT value FROM {} WHERE value != '{NONE_SENTINEL}'",
        finfo.table_address()
    ))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| row.first().and_then(crate::Value::as_text))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Contexts;

    fn write_cnf(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).expect("write");
        path
    }

    #[test]
    fn init_local_registers_and_prunes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bench = dir.path().join("bench");
        std::fs::create_dir_all(bench.join("sub")).expect("mkdir");
        let a = write_cnf(&bench, "a.cnf", "p cnf 2 1\n1 2 0\n");
        write_cnf(&bench.join("sub"), "b.cnf", "p cnf 2 1\n-1 2 0\n");
        write_cnf(&bench, "notes.txt", "ignored");
        write_cnf(&bench, "a.sanitized.cnf", "p cnf 2 1\n1 2 0\n");

        let mut session =
            Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).expect("open");
        let summary =
            init_local(&mut session, &bench, None, &RunOptions::default()).expect("init");
        assert_eq!(summary.stored, 2);
        assert!(summary.failures.is_empty());

        // second run hashes nothing new
        let summary =
            init_local(&mut session, &bench, None, &RunOptions::default()).expect("init");
        assert_eq!(summary.stored, 0);

        std::fs::remove_file(&a).expect("remove");
        init_local(&mut session, &bench, None, &RunOptions::default()).expect("init");
        let paths = registered_paths(&session, "cnf:local", "meta").expect("paths");
        assert_eq!(paths.len(), 1);
        assert!(paths.iter().all(|p| p.ends_with("b.cnf")));
    }

    #[test]
    fn init_features_runs_base_extractor() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cnf(dir.path(), "a.cnf", "p cnf 3 2\n1 2 0\n-3 0\n");
        let mut session =
            Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).expect("open");
        init_local(&mut session, dir.path(), None, &RunOptions::default()).expect("local");
        let summary = init_features(&mut session, "base", None, &[], &RunOptions::default())
            .expect("base");
        assert!(summary.failures.is_empty());
        let result = session
            .query(&QuerySpec::new("clauses = 2 and variables = 3").resolve(["clauses"]))
            .expect("query");
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn transform_requires_target_context_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session =
            Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).expect("open");
        let err = transform(&mut session, "sanitize", None, &[], &RunOptions::default())
            .expect_err("no sancnf catalog");
        assert_eq!(err.kind(), "ConfigurationError");
        let err = init_features(&mut session, "sanitize", None, &[], &RunOptions::default())
            .expect_err("transformer");
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn transform_records_translator() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_cnf(dir.path(), "a.cnf", "p cnf 2 2\n1 -1 0\n1 2 2 0\n");
        let mut session = Session::open(
            &[dir.path().join("meta.db"), dir.path().join("sancnf_meta.db")],
            Contexts::builtin(),
        )
        .expect("open");
        init_local(&mut session, dir.path(), None, &RunOptions::default()).expect("local");
        let summary = transform(&mut session, "sanitize", None, &[], &RunOptions::default())
            .expect("transform");
        assert_eq!(summary.stored, 2);

        let result = session
            .query(
                &QuerySpec::default()
                    .resolve(["sancnf:local"])
                    .group_by("cnf:hash")
                    .collapse(Collapse::None),
            )
            .expect("query");
        assert_eq!(result.len(), 1);
        let path = result.rows[0][1].to_string();
        assert!(path.ends_with("a.sanitized.cnf"));
    }
}
