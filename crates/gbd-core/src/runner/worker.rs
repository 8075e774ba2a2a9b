//! Worker side of the process pool.

use super::TaskFunction;
use crate::types::{FeatureRecord, GbdError, Limits, Result, Task};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One task for one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Registry name of the task function.
    pub function: String,
    pub task: Task,
    pub limits: Limits,
}

/// Answer of a worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerResponse {
    Ok { records: Vec<FeatureRecord> },
    Failed { kind: String, message: String },
}

impl WorkerResponse {
    #[must_use]
    pub fn from_result(result: Result<Vec<FeatureRecord>>) -> Self {
        match result {
            Ok(records) => Self::Ok { records },
            Err(err) => Self::Failed {
                kind: err.kind().to_string(),
                message: err.message(),
            },
        }
    }

    /// Back into a result; failures keep their original kind in the message.
    pub fn into_result(self) -> Result<Vec<FeatureRecord>> {
        match self {
            Self::Ok { records } => Ok(records),
            Self::Failed { kind, message } => Err(GbdError::Task(format!("{kind}: {message}"))),
        }
    }
}

/// Read one request from `input`, run it and write the response to
/// `output`. Task failures are reported in the response; only protocol
/// errors are returned.
pub fn serve(
    mut input: impl Read,
    mut output: impl Write,
    lookup: impl Fn(&str) -> Option<Box<dyn TaskFunction>>,
) -> Result<()> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let request: WorkerRequest = serde_json::from_slice(&raw)
        .map_err(|e| GbdError::Task(format!("Malformed worker request: {e}")))?;

    apply_limits(&request.limits);
    let result = match lookup(&request.function) {
        Some(func) => func.call(&request.task, &request.limits),
        None => Err(GbdError::Configuration(format!(
            "Unknown task function '{}'",
            request.function
        ))),
    };

    let response = WorkerResponse::from_result(result);
    serde_json::to_writer(&mut output, &response)
        .map_err(|e| GbdError::Task(format!("Unable to encode response: {e}")))?;
    output.flush()?;
    Ok(())
}

/// Cap this process's address space, file size and CPU time.
#[cfg(unix)]
fn apply_limits(limits: &Limits) {
    use rlimit::Resource;
    let caps = [
        (Resource::AS, limits.mlim_bytes()),
        (Resource::FSIZE, limits.flim_bytes()),
        (Resource::CPU, limits.tlim),
    ];
    for (resource, cap) in caps {
        if cap == 0 {
            continue;
        }
        if let Err(err) = rlimit::setrlimit(resource, cap, cap) {
            tracing::warn!(?resource, cap, error = %err, "Unable to apply resource limit");
        }
    }
}

#[cfg(not(unix))]
fn apply_limits(_limits: &Limits) {}
