//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//! Results go to stdout; diagnostics go through `tracing` to stderr.

use super::Selection;
use crate::api::{self, AppState};
use gbd_core::{
    Collapse, Contexts, GbdError, JoinType, QuerySpec, RunOptions, RunSummary, Session,
    init_features, init_local, transform,
};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::info;

// =============================================================================
// HELPERS
// =============================================================================

/// Ask on stderr for a yes/no answer; anything but `y`/`yes` declines.
fn confirm(prompt: &str) -> Result<bool, GbdError> {
    eprint!("{prompt} [n]|y: ");
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Split `key=value`.
pub fn parse_assignment(assign: &str) -> Result<(&str, &str), GbdError> {
    assign
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| {
            GbdError::Configuration(format!("Expected key=value, got '{assign}'"))
        })
}

fn print_json(value: &impl serde::Serialize) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn print_summary(summary: &RunSummary, json_mode: bool) {
    if json_mode {
        print_json(summary);
        return;
    }
    println!("Stored:  {}", summary.stored);
    println!("Failed:  {}", summary.failures.len());
    for failure in &summary.failures {
        println!("  {}: {}", failure.path.display(), failure.error);
    }
}

// =============================================================================
// QUERY COMMANDS
// =============================================================================

/// Print the rows of a query, one line per row.
pub fn cmd_get(
    session: &Session,
    selection: &Selection,
    resolve: Vec<String>,
    collapse: &str,
    group_by: Option<String>,
    join_type: &str,
    subselect: bool,
    json_mode: bool,
) -> Result<(), GbdError> {
    let spec = QuerySpec {
        query: selection.query.clone(),
        hashes: selection.hashes.clone(),
        resolve,
        group_by,
        join_type: join_type.parse::<JoinType>()?,
        collapse: collapse.parse::<Collapse>()?,
        subselect,
    };
    let result = session.query(&spec)?;

    if json_mode {
        print_json(&result);
        return Ok(());
    }

    let mut out = std::io::stdout().lock();
    for row in &result.rows {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    Ok(())
}

/// Print the hash of one benchmark file; the context follows from its suffix.
pub fn cmd_hash(path: &Path) -> Result<(), GbdError> {
    let ctx = Contexts::builtin().get_context_by_suffix(path)?;
    println!("{}", ctx.identify(path)?);
    Ok(())
}

/// List catalogs and their features, or summarize feature `name`.
pub fn cmd_info(
    session: &Session,
    name: Option<&str>,
    verbose: bool,
    json_mode: bool,
) -> Result<(), GbdError> {
    if let Some(name) = name {
        let stats = session.feature_info(name)?;
        if json_mode {
            print_json(&stats);
            return Ok(());
        }
        println!("name: {}", stats.name);
        println!("database: {}", stats.database);
        println!("default: {}", stats.default.as_deref().unwrap_or("[None]"));
        println!("count: {}", stats.count);
        if let (Some(min), Some(max)) = (stats.min, stats.max) {
            println!("min: {min}");
            println!("max: {max}");
        }
        if stats.non_numeric > 0 {
            println!("non-numeric: {}", stats.non_numeric);
            println!("values: {}", stats.values.join(" "));
        }
        return Ok(());
    }

    let mut listing = Vec::new();
    for db in session.databases() {
        let features = session.features(Some(db))?;
        if features.is_empty() {
            continue;
        }
        let path = session
            .database_path(db)?
            .map_or_else(|| ":memory:".to_string(), |p| p.display().to_string());
        listing.push((db.to_string(), path, features));
    }

    if json_mode {
        let output: Vec<serde_json::Value> = listing
            .iter()
            .map(|(db, path, features)| {
                serde_json::json!({ "name": db, "path": path, "features": features })
            })
            .collect();
        print_json(&output);
        return Ok(());
    }

    for (db, path, features) in &listing {
        println!();
        println!("Database: {path}");
        println!("Name: {db}");
        println!("Features: {}", features.join(" "));
        if verbose {
            for feature in features {
                if let Some(binding) = session.database().find_in(feature, db)? {
                    println!("  {binding:?}");
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// MUTATION COMMANDS
// =============================================================================

/// Assign `key=value` to the hashes selected by `selection`.
pub fn cmd_set(
    session: &mut Session,
    assign: &str,
    selection: &Selection,
    create: bool,
    target: Option<&str>,
) -> Result<(), GbdError> {
    let (name, value) = parse_assignment(assign)?;
    let mut hashes: BTreeSet<String> = session
        .query_hashes(selection.query.as_deref(), &selection.hashes)?
        .into_iter()
        .collect();
    if create {
        hashes.extend(selection.hashes.iter().cloned());
    }
    if hashes.is_empty() {
        info!("No hashes selected, nothing to set");
        return Ok(());
    }
    let hashes: Vec<String> = hashes.into_iter().collect();
    session.set_values(name, value, &hashes, target)?;
    info!(feature = name, count = hashes.len(), "Values set");
    Ok(())
}

pub fn cmd_create(
    session: &mut Session,
    name: &str,
    unique: Option<&str>,
    target: Option<&str>,
) -> Result<(), GbdError> {
    session.create_feature(name, unique, target)?;
    info!(feature = name, "Feature created");
    Ok(())
}

/// Reset values of given hashes or values, or drop the whole feature.
pub fn cmd_delete(
    session: &mut Session,
    name: &str,
    hashes: &[String],
    values: &[String],
    force: bool,
    target: Option<&str>,
) -> Result<(), GbdError> {
    if !hashes.is_empty() || !values.is_empty() {
        let prompt = format!("Delete attributes of given hashes and/or values from '{name}'?");
        if force || confirm(&prompt)? {
            session.reset_values(name, values, hashes, target)?;
        }
    } else if force || confirm(&format!("Delete feature '{name}' and all associated attributes?"))? {
        session.delete_feature(name, target)?;
        info!(feature = name, "Feature deleted");
    }
    Ok(())
}

/// Remove `hashes` from every feature of the target catalog.
pub fn cmd_cleanup(
    session: &mut Session,
    hashes: &[String],
    force: bool,
    target: Option<&str>,
) -> Result<(), GbdError> {
    if hashes.is_empty() {
        return Ok(());
    }
    if force || confirm("Delete attributes of given hashes from all features?")? {
        session.delete_hashes(hashes, target)?;
        info!(count = hashes.len(), "Hashes removed");
    }
    Ok(())
}

pub fn cmd_rename(
    session: &mut Session,
    old: &str,
    new: &str,
    target: Option<&str>,
) -> Result<(), GbdError> {
    session.rename_feature(old, new, target)
}

pub fn cmd_copy(
    session: &mut Session,
    old: &str,
    new: &str,
    selection: &Selection,
    target: Option<&str>,
) -> Result<(), GbdError> {
    session.copy_feature(
        old,
        new,
        target,
        selection.query.as_deref(),
        &selection.hashes,
    )
}

pub fn cmd_import(
    session: &mut Session,
    file: &Path,
    key: &str,
    columns: &[String],
    default: Option<&str>,
    target: Option<&str>,
    json_mode: bool,
) -> Result<(), GbdError> {
    let written = session.import_csv(file, key, columns, default, target)?;
    if json_mode {
        print_json(&serde_json::json!({ "written": written }));
    } else {
        println!("Written: {written}");
    }
    Ok(())
}

// =============================================================================
// EXTRACTION COMMANDS
// =============================================================================

pub fn cmd_init_local(
    session: &mut Session,
    path: &Path,
    context: Option<&str>,
    options: &RunOptions,
    json_mode: bool,
) -> Result<(), GbdError> {
    if !path.is_dir() {
        return Err(GbdError::Io(format!(
            "Directory '{}' does not exist",
            path.display()
        )));
    }
    let ctx = context
        .map(|c| session.database().contexts().parse(c))
        .transpose()?;
    let summary = init_local(session, path, ctx, options)?;
    print_summary(&summary, json_mode);
    Ok(())
}

pub fn cmd_init_features(
    session: &mut Session,
    extractor: &str,
    selection: &Selection,
    options: &RunOptions,
    json_mode: bool,
) -> Result<(), GbdError> {
    let summary = init_features(
        session,
        extractor,
        selection.query.as_deref(),
        &selection.hashes,
        options,
    )?;
    print_summary(&summary, json_mode);
    Ok(())
}

pub fn cmd_transform(
    session: &mut Session,
    transformer: &str,
    selection: &Selection,
    options: &RunOptions,
    json_mode: bool,
) -> Result<(), GbdError> {
    let summary = transform(
        session,
        transformer,
        selection.query.as_deref(),
        &selection.hashes,
        options,
    )?;
    print_summary(&summary, json_mode);
    Ok(())
}

/// Serve one task request from stdin; used by the runner's process pool.
pub fn cmd_worker() -> Result<(), GbdError> {
    gbd_core::runner::worker::serve(
        std::io::stdin().lock(),
        std::io::stdout().lock(),
        gbd_core::extractors::lookup,
    )
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_serve(
    session: Session,
    host: &str,
    port: u16,
    rate_limit: u32,
) -> Result<(), GbdError> {
    info!(databases = ?session.databases(), "Opening catalogs for serving");
    let state = AppState::with_rate_limit(session, api::get_rate_limit_from_env(rate_limit));
    let addr = format!("{host}:{port}");
    api::run_server(&addr, state).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_splits_on_first_equals() {
        assert_eq!(parse_assignment("family=crypto").expect("split"), ("family", "crypto"));
        assert_eq!(parse_assignment("note = a=b").expect("split"), ("note", "a=b"));
    }

    #[test]
    fn assignment_requires_key() {
        let err = parse_assignment("=value").expect_err("no key");
        assert_eq!(err.kind(), "ConfigurationError");
        assert!(parse_assignment("novalue").is_err());
    }
}
