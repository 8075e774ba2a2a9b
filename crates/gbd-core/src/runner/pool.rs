//! Process pool: one short-lived worker process per task.
//!
//! Each worker receives a [`WorkerRequest`] as JSON on stdin and answers
//! with one [`WorkerResponse`] on stdout. The driver enforces the wall time
//! limit and kills expired workers; memory and file-size limits are applied
//! by the worker to itself. A worker that dies without answering counts as
//! a failed task.

use super::worker::{WorkerRequest, WorkerResponse};
use crate::types::{FeatureRecord, GbdError, Limits, Result, Task};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Executable and arguments that start one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// The running executable's hidden `worker` subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, &["worker"]))
    }
}

/// Fixed-size pool of worker slots.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    command: WorkerCommand,
    size: usize,
    limits: Limits,
}

impl ProcessPool {
    #[must_use]
    pub fn new(command: WorkerCommand, size: usize, limits: Limits) -> Self {
        Self {
            command,
            size: size.max(1),
            limits,
        }
    }

    /// Run `function` over `tasks`; `on_result` sees `(task index, outcome)`
    /// in completion order on the calling thread. An error returned by
    /// `on_result` stops scheduling and is returned once running workers
    /// have finished.
    pub fn run(
        &self,
        function: &str,
        tasks: &[Task],
        mut on_result: impl FnMut(usize, Result<Vec<FeatureRecord>>) -> Result<()>,
    ) -> Result<()> {
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..self.size.min(tasks.len()) {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(task) = tasks.get(index) else {
                            break;
                        };
                        let outcome = self.execute(function, task);
                        if tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut status = Ok(());
            for (index, outcome) in rx {
                if status.is_ok() {
                    status = on_result(index, outcome);
                    if status.is_err() {
                        // stop handing out tasks
                        next.store(tasks.len(), Ordering::SeqCst);
                    }
                }
            }
            status
        })
    }

    /// Run one task in a fresh worker process.
    fn execute(&self, function: &str, task: &Task) -> Result<Vec<FeatureRecord>> {
        let request = WorkerRequest {
            function: function.to_string(),
            task: task.clone(),
            limits: self.limits,
        };
        let payload = serde_json::to_vec(&request)
            .map_err(|e| GbdError::Task(format!("Unable to encode request: {e}")))?;

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                GbdError::Task(format!(
                    "Unable to start worker '{}': {e}",
                    self.command.program.display()
                ))
            })?;
        debug!(pid = child.id(), path = %task.path.display(), "Worker started");

        if let Some(mut stdin) = child.stdin.take() {
            // a worker that died early closes the pipe; its exit status tells why
            let _ = stdin.write_all(&payload);
        }
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.kill();
            return Err(GbdError::Task("Worker stdout unavailable".to_string()));
        };
        let reader = thread::spawn(move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).map(|_| out)
        });

        let waited = self.wait(&mut child);
        let output = reader
            .join()
            .map_err(|_| GbdError::Task("Worker output reader panicked".to_string()))?;
        let status = waited?;
        if !status.success() {
            return Err(GbdError::Task(format!("Worker exited with {status}")));
        }
        let output = output?;
        let response: WorkerResponse = serde_json::from_slice(&output)
            .map_err(|e| GbdError::Task(format!("Malformed worker response: {e}")))?;
        response.into_result()
    }

    /// Wait for `child`, killing it once the time limit has passed.
    fn wait(&self, child: &mut Child) -> Result<std::process::ExitStatus> {
        let deadline = (self.limits.tlim > 0)
            .then(|| Instant::now() + Duration::from_secs(self.limits.tlim));
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GbdError::Task(format!(
                    "Task exceeded time limit of {} s",
                    self.limits.tlim
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn worker_without_answer_is_a_task_failure() {
        let pool = ProcessPool::new(WorkerCommand::new("true", &[]), 2, Limits::default());
        let tasks = vec![Task::new(None, "a.cnf"), Task::new(None, "b.cnf")];
        let mut seen = Vec::new();
        pool.run("local", &tasks, |index, outcome| {
            let err = outcome.expect_err("no response");
            assert_eq!(err.kind(), "TaskError");
            seen.push(index);
            Ok(())
        })
        .expect("run");
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1]);
    }

    #[cfg(unix)]
    #[test]
    fn expired_worker_is_killed() {
        let limits = Limits {
            tlim: 1,
            ..Limits::default()
        };
        let pool = ProcessPool::new(WorkerCommand::new("sleep", &["30"]), 1, limits);
        let tasks = vec![Task::new(None, "slow.cnf")];
        let started = Instant::now();
        pool.run("local", &tasks, |_, outcome| {
            let err = outcome.expect_err("expired");
            assert!(err.to_string().contains("time limit"));
            Ok(())
        })
        .expect("run");
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn missing_program_fails_each_task() {
        let pool = ProcessPool::new(
            WorkerCommand::new("/nonexistent/gbd-worker", &["worker"]),
            1,
            Limits::default(),
        );
        let tasks = vec![Task::new(None, "a.cnf")];
        let mut failures = 0;
        pool.run("local", &tasks, |_, outcome| {
            if outcome.is_err() {
                failures += 1;
            }
            Ok(())
        })
        .expect("run");
        assert_eq!(failures, 1);
    }
}
