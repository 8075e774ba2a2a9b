//! # Built-in Task Functions
//!
//! - `local[:ctx]`: hash a benchmark file and record its path
//! - `base`: integer structure counts of a CNF formula
//! - `sanitize`: rewrite a CNF without duplicate literals and tautologies
//!   (`cnf` to `sancnf`)
//!
//! Worker processes find these through [`lookup`].

use crate::context::Context;
use crate::hasher::open_benchmark;
use crate::primitives::DEFAULT_FEATURE_VALUE;
use crate::runner::TaskFunction;
use crate::types::{FeatureRecord, GbdError, Limits, Result, Task};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Registry names of the built-in functions.
pub const REGISTERED: [&str; 3] = ["local", "base", "sanitize"];

/// Built-in task function called `name`. `local` accepts a context
/// qualifier (`local:kis`) and defaults to `cnf`.
#[must_use]
pub fn lookup(name: &str) -> Option<Box<dyn TaskFunction>> {
    let (base, qualifier) = match name.split_once(':') {
        Some((b, q)) => (b, Some(q)),
        None => (name, None),
    };
    match (base, qualifier) {
        ("local", None) => Some(Box::new(LocalHasher::new(Context::Cnf))),
        ("local", Some(ctx)) => {
            let ctx = ctx.parse::<Context>().ok()?;
            Some(Box::new(LocalHasher::new(ctx)))
        }
        ("base", None) => Some(Box::new(CnfBase)),
        ("sanitize", None) => Some(Box::new(CnfSanitizer)),
        _ => None,
    }
}

// =============================================================================
// LOCAL (HASHING)
// =============================================================================

/// Hashes a file in one context and records it as `<ctx>:local`.
#[derive(Debug, Clone)]
pub struct LocalHasher {
    context: Context,
    name: String,
}

impl LocalHasher {
    #[must_use]
    pub fn new(context: Context) -> Self {
        Self {
            context,
            name: format!("local:{context}"),
        }
    }
}

impl TaskFunction for LocalHasher {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, task: &Task, _limits: &Limits) -> Result<Vec<FeatureRecord>> {
        debug!(path = %task.path.display(), "Hashing");
        let hash = self.context.identify(&task.path)?;
        Ok(vec![FeatureRecord::new(
            format!("{}:local", self.context),
            hash,
            task.path.to_string_lossy(),
        )])
    }

    fn features(&self) -> Vec<(String, Option<String>)> {
        vec![(format!("{}:local", self.context), None)]
    }

    fn source_context(&self) -> Option<Context> {
        Some(self.context)
    }
}

// =============================================================================
// CNF PARSING
// =============================================================================

/// Stream the clauses of a DIMACS CNF; returns the uncompressed byte count.
fn read_clauses(path: &Path, mut on_clause: impl FnMut(&[i64])) -> Result<u64> {
    let mut reader = BufReader::new(open_benchmark(path)?);
    let mut line = Vec::new();
    let mut clause = Vec::new();
    let mut bytes = 0u64;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        bytes = bytes.saturating_add(n as u64);
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(['c', 'p', '%']) {
            continue;
        }
        for token in trimmed.split_ascii_whitespace() {
            let lit: i64 = token.parse().map_err(|_| {
                GbdError::Task(format!(
                    "Malformed literal '{token}' in '{}'",
                    path.display()
                ))
            })?;
            if lit == 0 {
                on_clause(&clause);
                clause.clear();
            } else {
                clause.push(lit);
            }
        }
    }
    if !clause.is_empty() {
        on_clause(&clause);
    }
    Ok(bytes)
}

// =============================================================================
// BASE FEATURES
// =============================================================================

const CLAUSE_SIZE_BUCKETS: usize = 9;

/// Structure counts of one formula.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseFeatures {
    pub variables: u64,
    pub clauses: u64,
    pub bytes: u64,
    /// Clauses of size 1..=8; the last bucket holds sizes of 9 and more.
    pub clause_sizes: [u64; CLAUSE_SIZE_BUCKETS],
    /// At most one positive literal.
    pub horn_clauses: u64,
    /// At most one negative literal.
    pub inv_horn_clauses: u64,
    pub positive_clauses: u64,
    pub negative_clauses: u64,
}

impl BaseFeatures {
    pub fn extract(path: &Path) -> Result<Self> {
        let mut f = Self::default();
        let bytes = read_clauses(path, |clause| {
            f.clauses += 1;
            let positive = clause.iter().filter(|l| **l > 0).count();
            let negative = clause.len() - positive;
            if let Some(max) = clause.iter().map(|l| l.unsigned_abs()).max() {
                f.variables = f.variables.max(max);
            }
            if let Some(bucket) = clause.len().checked_sub(1) {
                f.clause_sizes[bucket.min(CLAUSE_SIZE_BUCKETS - 1)] += 1;
            }
            if positive <= 1 {
                f.horn_clauses += 1;
            }
            if negative <= 1 {
                f.inv_horn_clauses += 1;
            }
            if negative == 0 {
                f.positive_clauses += 1;
            }
            if positive == 0 {
                f.negative_clauses += 1;
            }
        })?;
        f.bytes = bytes;
        Ok(f)
    }

    /// `(feature, value)` pairs in a fixed order.
    #[must_use]
    pub fn pairs(&self) -> Vec<(String, u64)> {
        let mut out = vec![
            ("variables".to_string(), self.variables),
            ("clauses".to_string(), self.clauses),
            ("bytes".to_string(), self.bytes),
        ];
        for (i, count) in self.clause_sizes.iter().enumerate() {
            out.push((format!("clause_size_{}", i + 1), *count));
        }
        out.extend([
            ("horn_clauses".to_string(), self.horn_clauses),
            ("inv_horn_clauses".to_string(), self.inv_horn_clauses),
            ("positive_clauses".to_string(), self.positive_clauses),
            ("negative_clauses".to_string(), self.negative_clauses),
        ]);
        out
    }
}

/// Extractor of [`BaseFeatures`].
#[derive(Debug, Clone, Copy)]
pub struct CnfBase;

impl TaskFunction for CnfBase {
    fn name(&self) -> &str {
        "base"
    }

    fn call(&self, task: &Task, _limits: &Limits) -> Result<Vec<FeatureRecord>> {
        let hash = task.hash.clone().ok_or_else(|| {
            GbdError::Task(format!("No hash given for '{}'", task.path.display()))
        })?;
        debug!(%hash, path = %task.path.display(), "Extracting base features");
        let features = BaseFeatures::extract(&task.path)?;
        Ok(features
            .pairs()
            .into_iter()
            .map(|(name, value)| FeatureRecord::new(name, hash.clone(), value.to_string()))
            .collect())
    }

    fn features(&self) -> Vec<(String, Option<String>)> {
        BaseFeatures::default()
            .pairs()
            .into_iter()
            .map(|(name, _)| (name, Some(DEFAULT_FEATURE_VALUE.to_string())))
            .collect()
    }

    fn source_context(&self) -> Option<Context> {
        Some(Context::Cnf)
    }
}

// =============================================================================
// SANITIZER
// =============================================================================

/// `cnf` to `sancnf`: drops duplicate literals and tautological clauses.
#[derive(Debug, Clone, Copy)]
pub struct CnfSanitizer;

impl CnfSanitizer {
    /// `<stem>.sanitized.cnf` next to the source file.
    #[must_use]
    pub fn output_path(path: &Path) -> PathBuf {
        let text = path.to_string_lossy();
        let stem_len = Context::Cnf
            .suffixes()
            .iter()
            .filter(|s| text.ends_with(s.as_str()))
            .map(|s| text.len() - s.len())
            .min()
            .unwrap_or(text.len());
        PathBuf::from(format!("{}{}", &text[..stem_len], Context::SanCnf.base_suffix()))
    }

    fn write(source: &Path, target: &Path) -> Result<()> {
        let mut clauses: Vec<Vec<i64>> = Vec::new();
        let mut variables = 0u64;
        read_clauses(source, |clause| {
            let mut seen = BTreeSet::new();
            let mut kept = Vec::with_capacity(clause.len());
            for &lit in clause {
                variables = variables.max(lit.unsigned_abs());
                if seen.contains(&-lit) {
                    kept.clear();
                    return;
                }
                if seen.insert(lit) {
                    kept.push(lit);
                }
            }
            clauses.push(kept);
        })?;

        let mut out = BufWriter::new(File::create(target)?);
        writeln!(out, "p cnf {variables} {}", clauses.len())?;
        for clause in &clauses {
            for lit in clause {
                write!(out, "{lit} ")?;
            }
            writeln!(out, "0")?;
        }
        out.flush()?;
        Ok(())
    }
}

impl TaskFunction for CnfSanitizer {
    fn name(&self) -> &str {
        "sanitize"
    }

    fn call(&self, task: &Task, limits: &Limits) -> Result<Vec<FeatureRecord>> {
        let hash = task.hash.clone().ok_or_else(|| {
            GbdError::Task(format!("No hash given for '{}'", task.path.display()))
        })?;
        let target = Self::output_path(&task.path);
        if !target.is_file() {
            debug!(path = %task.path.display(), target = %target.display(), "Sanitizing");
            if let Err(err) = Self::write(&task.path, &target) {
                let _ = std::fs::remove_file(&target);
                return Err(err);
            }
        }
        let size = std::fs::metadata(&target)?.len();
        if limits.flim > 0 && size > limits.flim_bytes() {
            let _ = std::fs::remove_file(&target);
            return Err(GbdError::Task(format!(
                "Sanitized file of '{}' exceeds file size limit of {} MB",
                task.path.display(),
                limits.flim
            )));
        }
        let sanhash = Context::SanCnf.identify(&target)?;
        Ok(vec![
            FeatureRecord::new("sancnf:local", sanhash.clone(), target.to_string_lossy()),
            FeatureRecord::new("sancnf:to_cnf", sanhash, hash),
        ])
    }

    fn features(&self) -> Vec<(String, Option<String>)> {
        vec![
            ("sancnf:local".to_string(), None),
            ("sancnf:to_cnf".to_string(), None),
        ]
    }

    fn source_context(&self) -> Option<Context> {
        Some(Context::Cnf)
    }

    fn target_context(&self) -> Option<Context> {
        Some(Context::SanCnf)
    }
}
