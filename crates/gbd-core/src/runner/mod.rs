//! # Extraction Runner
//!
//! Runs a [`TaskFunction`] over a list of [`Task`]s and writes every
//! returned `(feature, hash, value)` record into a catalog.
//!
//! With `jobs == 1` tasks run sequentially on the calling thread. Otherwise
//! each task runs in its own worker process (see [`pool`]), at most
//! `min(jobs, cpu_count)` at a time, and results are applied in completion
//! order. A failing or expired task is logged and skipped; the run goes on.

pub mod pool;
pub mod worker;

pub use pool::{ProcessPool, WorkerCommand};
pub use worker::{WorkerRequest, WorkerResponse};

use crate::context::Context;
use crate::primitives::DEFAULT_FEATURE_VALUE;
use crate::store::Database;
use crate::types::{FeatureRecord, GbdError, Limits, Result, Task};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

// =============================================================================
// TASK FUNCTIONS
// =============================================================================

/// A pure extraction or transformation step over one benchmark file.
///
/// Implementations may return a hash different from the task's (hashing
/// jobs and transformers produce new identities).
pub trait TaskFunction: Send + Sync {
    /// Registry name, used to look the function up inside worker processes.
    fn name(&self) -> &str;

    fn call(&self, task: &Task, limits: &Limits) -> Result<Vec<FeatureRecord>>;

    /// Features written by this function with their defaults, created in
    /// the target catalog before a run.
    fn features(&self) -> Vec<(String, Option<String>)> {
        Vec::new()
    }

    /// Context of the instances this function accepts.
    fn source_context(&self) -> Option<Context> {
        None
    }

    /// Context of the instances a transformer produces.
    fn target_context(&self) -> Option<Context> {
        None
    }
}

// =============================================================================
// RUN
// =============================================================================

/// Options of one runner invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub limits: Limits,
    /// Catalog receiving the results; the default write target if `None`.
    pub target: Option<String>,
    /// Create unknown result features on first use.
    pub permissive: bool,
    /// Worker executable; defaults to the current executable with `worker`.
    pub worker: Option<WorkerCommand>,
}

/// One task that raised or exceeded its limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub path: PathBuf,
    /// `<Kind>: <message>`
    pub error: String,
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Records written to the catalog.
    pub stored: usize,
    pub failures: Vec<TaskFailure>,
}

/// Run `func` over `tasks`, storing every returned record in `db`.
pub fn run(
    db: &mut Database,
    tasks: &[Task],
    func: &dyn TaskFunction,
    options: &RunOptions,
) -> Result<RunSummary> {
    let target = db.target_db(options.target.as_deref())?;
    let mut sink = Sink {
        db,
        target,
        check: options.permissive,
        summary: RunSummary::default(),
    };
    info!(
        function = func.name(),
        tasks = tasks.len(),
        jobs = options.limits.jobs,
        "Starting run"
    );

    if options.limits.jobs <= 1 {
        for task in tasks {
            let outcome = func.call(task, &options.limits);
            sink.accept(task, outcome)?;
        }
    } else {
        let command = match &options.worker {
            Some(command) => command.clone(),
            None => WorkerCommand::current_exe()?,
        };
        let size = options.limits.jobs.min(num_cpus::get()).max(1);
        let pool = ProcessPool::new(command, size, options.limits);
        pool.run(func.name(), tasks, |index, outcome| match tasks.get(index) {
            Some(task) => sink.accept(task, outcome),
            None => Err(GbdError::Task(format!("Unknown task index {index}"))),
        })?;
    }

    let summary = sink.summary;
    info!(
        stored = summary.stored,
        failed = summary.failures.len(),
        "Run finished"
    );
    Ok(summary)
}

/// Applies task results to the target catalog.
struct Sink<'a> {
    db: &'a mut Database,
    target: String,
    /// Still waiting for the first successful result in permissive mode.
    check: bool,
    summary: RunSummary,
}

impl Sink<'_> {
    fn accept(&mut self, task: &Task, outcome: Result<Vec<FeatureRecord>>) -> Result<()> {
        match outcome {
            Ok(records) => self.store(records),
            Err(err) => {
                warn!(path = %task.path.display(), "{err}");
                self.summary.failures.push(TaskFailure {
                    path: task.path.clone(),
                    error: err.to_string(),
                });
                Ok(())
            }
        }
    }

    fn store(&mut self, records: Vec<FeatureRecord>) -> Result<()> {
        if self.check {
            for record in &records {
                if self.db.find_in(&record.name, &self.target)?.is_none() {
                    let default = if is_path_feature(&record.name) {
                        None
                    } else {
                        Some(DEFAULT_FEATURE_VALUE)
                    };
                    self.db
                        .create_feature(&record.name, default, Some(&self.target), true)?;
                }
            }
            self.check = false;
        }
        for record in records {
            debug!(
                feature = %record.name,
                hash = %record.hash,
                value = %record.value,
                "Saving value"
            );
            self.db.set_values(
                &record.name,
                &record.value,
                std::slice::from_ref(&record.hash),
                Some(&self.target),
            )?;
            self.summary.stored += 1;
        }
        Ok(())
    }
}

/// Path-valued features are multi-valued.
fn is_path_feature(name: &str) -> bool {
    let bare = name.rsplit(':').next().unwrap_or(name);
    bare == "local" || bare.ends_with("_local") || bare.starts_with("to_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Contexts;
    use crate::query::{Collapse, QuerySpec};
    use crate::session::Session;

    struct Length;

    impl TaskFunction for Length {
        fn name(&self) -> &str {
            "length"
        }

        fn call(&self, task: &Task, _limits: &Limits) -> Result<Vec<FeatureRecord>> {
            let bytes = std::fs::read(&task.path)?;
            let hash = task.hash.clone().unwrap_or_default();
            Ok(vec![FeatureRecord::new("length", hash, bytes.len().to_string())])
        }
    }

    #[test]
    fn sequential_run_skips_failing_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session =
            Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).expect("open");
        let mut tasks = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("f{i}.txt"));
            std::fs::write(&path, "x".repeat(i + 1)).expect("write");
            tasks.push(Task::new(Some(format!("h{i}")), path));
        }
        tasks.insert(1, Task::new(Some("hx".to_string()), dir.path().join("missing.txt")));

        let options = RunOptions {
            permissive: true,
            ..RunOptions::default()
        };
        let summary = run(session.database_mut(), &tasks, &Length, &options).expect("run");
        assert_eq!(summary.stored, 3);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].error.starts_with("IoError: "));

        let result = session
            .query(&QuerySpec::default().resolve(["length"]).collapse(Collapse::None))
            .expect("query");
        let values: Vec<String> = result.rows.iter().map(|r| r[1].to_string()).collect();
        assert_eq!(values, vec!["1", "2", "3"]);
        let info = session.feature_binding("length").expect("created");
        assert_eq!(info.default.as_deref(), Some(DEFAULT_FEATURE_VALUE));
    }

    #[test]
    fn strict_run_rejects_unknown_features() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut session =
            Session::open(&[dir.path().join("meta.db")], Contexts::builtin()).expect("open");
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "abc").expect("write");
        let tasks = vec![Task::new(Some("h".to_string()), path)];
        let err = run(session.database_mut(), &tasks, &Length, &RunOptions::default())
            .expect_err("unknown feature");
        assert_eq!(err.kind(), "ResolutionError");
    }

    #[test]
    fn path_features_are_multi_valued() {
        assert!(is_path_feature("local"));
        assert!(is_path_feature("sancnf:local"));
        assert!(is_path_feature("kis_local"));
        assert!(is_path_feature("to_cnf"));
        assert!(!is_path_feature("clauses"));
    }
}
