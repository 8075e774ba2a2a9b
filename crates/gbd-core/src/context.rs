//! # Context Registry
//!
//! A context is a problem-family tag (`cnf`, `kis`, ...). Each context fixes
//! the file suffixes accepted when scanning directories and the function that
//! derives the canonical hash of an instance.
//!
//! The set of contexts is closed. The registry (`Contexts`) is an immutable
//! value handed to the store at construction; it also fixes the default
//! context, whose tables carry no name prefix.

use crate::hasher;
use crate::types::{GbdError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Compression suffixes accepted after every base suffix.
const COMPRESSION_SUFFIXES: [&str; 5] = ["", ".gz", ".lzma", ".xz", ".bz2"];

/// A problem-family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Cnf,
    SanCnf,
    Kis,
    Opb,
    Wecnf,
}

impl Context {
    /// All built-in contexts, in registry order.
    pub const ALL: [Self; 5] = [Self::Cnf, Self::SanCnf, Self::Kis, Self::Opb, Self::Wecnf];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cnf => "cnf",
            Self::SanCnf => "sancnf",
            Self::Kis => "kis",
            Self::Opb => "opb",
            Self::Wecnf => "wecnf",
        }
    }

    /// Stable numeric id of the context.
    #[must_use]
    pub const fn id(self) -> u32 {
        match self {
            Self::Cnf => 100,
            Self::SanCnf => 101,
            Self::Kis => 200,
            Self::Opb => 300,
            Self::Wecnf => 400,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Cnf => "Conjunctive Normal Form (CNF) in DIMACS format",
            Self::SanCnf => "Conjunctive Normal Form (CNF) in sanitized DIMACS format",
            Self::Kis => "k-Independent Set (KIS) in DIMACS-like graph format",
            Self::Opb => "Pseudo-Boolean Optimization Problem in OPB format",
            Self::Wecnf => "Weighted Extended Conjunctive Normal Form (WECNF)",
        }
    }

    /// Base file suffix, without compression.
    #[must_use]
    pub const fn base_suffix(self) -> &'static str {
        match self {
            Self::Cnf => ".cnf",
            Self::SanCnf => ".sanitized.cnf",
            Self::Kis => ".kis",
            Self::Opb => ".opb",
            Self::Wecnf => ".wecnf",
        }
    }

    /// Ordered list of accepted file suffixes.
    #[must_use]
    pub fn suffixes(self) -> Vec<String> {
        COMPRESSION_SUFFIXES
            .iter()
            .map(|c| format!("{}{}", self.base_suffix(), c))
            .collect()
    }

    /// Longest suffix of this context matching `path`, if any.
    fn matching_suffix_len(self, path: &str) -> Option<usize> {
        self.suffixes()
            .iter()
            .filter(|s| path.ends_with(s.as_str()))
            .map(|s| s.len())
            .max()
    }

    /// Canonical hash of the instance at `path`.
    pub fn identify(self, path: &Path) -> Result<String> {
        match self {
            Self::Cnf | Self::SanCnf | Self::Wecnf => hasher::identify_cnf(path),
            Self::Kis => hasher::identify_tokens(path, b'c'),
            Self::Opb => hasher::identify_tokens(path, b'*'),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Context {
    type Err = GbdError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| GbdError::Configuration(format!("Context '{s}' not found")))
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Immutable registry of contexts with a designated default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contexts {
    default: Context,
    registered: Vec<Context>,
}

impl Default for Contexts {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Contexts {
    /// All built-in contexts with `cnf` as default.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            default: Context::Cnf,
            registered: Context::ALL.to_vec(),
        }
    }

    #[must_use]
    pub const fn default_context(&self) -> Context {
        self.default
    }

    pub fn iter(&self) -> impl Iterator<Item = Context> + '_ {
        self.registered.iter().copied()
    }

    /// Registered context named `name`, if any.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Context> {
        self.iter().find(|c| c.name() == name)
    }

    /// Like [`Self::lookup`], failing with a configuration error.
    pub fn parse(&self, name: &str) -> Result<Context> {
        self.lookup(name)
            .ok_or_else(|| GbdError::Configuration(format!("Context '{name}' not found")))
    }

    /// Split `ctx_rest` into `(ctx, rest)` when `ctx` is registered.
    #[must_use]
    pub fn split_prefixed<'a>(&self, name: &'a str) -> Option<(Context, &'a str)> {
        let (prefix, rest) = name.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        self.lookup(prefix).map(|ctx| (ctx, rest))
    }

    /// Context encoded in a name of the form `ctx_<rest>`, else the default.
    #[must_use]
    pub fn context_from_name(&self, name: &str) -> Context {
        self.split_prefixed(name)
            .map(|(ctx, _)| ctx)
            .unwrap_or(self.default)
    }

    /// Inverse of [`Self::context_from_name`].
    #[must_use]
    pub fn prepend_context(&self, feature: &str, ctx: Context) -> String {
        if ctx == self.default {
            feature.to_string()
        } else {
            format!("{}_{}", ctx.name(), feature)
        }
    }

    /// Context whose suffix list matches `path`, preferring the longest suffix.
    pub fn get_context_by_suffix(&self, path: &Path) -> Result<Context> {
        let text = path.to_string_lossy();
        self.iter()
            .filter_map(|ctx| ctx.matching_suffix_len(&text).map(|len| (len, ctx)))
            .max_by_key(|(len, _)| *len)
            .map(|(_, ctx)| ctx)
            .ok_or_else(|| {
                GbdError::Configuration(format!(
                    "Unable to determine context from path '{}'",
                    path.display()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn context_from_name_uses_registered_prefix() {
        let contexts = Contexts::builtin();
        assert_eq!(contexts.context_from_name("kis_features"), Context::Kis);
        assert_eq!(contexts.context_from_name("sancnf_local"), Context::SanCnf);
        assert_eq!(contexts.context_from_name("runtime"), Context::Cnf);
        assert_eq!(contexts.context_from_name("foo_bar"), Context::Cnf);
        assert_eq!(contexts.context_from_name("kis_"), Context::Cnf);
    }

    #[test]
    fn prepend_context_is_inverse() {
        let contexts = Contexts::builtin();
        assert_eq!(contexts.prepend_context("features", Context::Cnf), "features");
        let name = contexts.prepend_context("nodes", Context::Kis);
        assert_eq!(name, "kis_nodes");
        assert_eq!(contexts.context_from_name(&name), Context::Kis);
    }

    #[test]
    fn suffix_lookup_prefers_longest_match() {
        let contexts = Contexts::builtin();
        let by_suffix = |p: &str| contexts.get_context_by_suffix(&PathBuf::from(p));
        assert_eq!(by_suffix("a/b.cnf").ok(), Some(Context::Cnf));
        assert_eq!(by_suffix("a/b.cnf.xz").ok(), Some(Context::Cnf));
        assert_eq!(by_suffix("a/b.sanitized.cnf.gz").ok(), Some(Context::SanCnf));
        assert_eq!(by_suffix("b.kis.bz2").ok(), Some(Context::Kis));
        assert!(by_suffix("b.txt").is_err());
    }

    #[test]
    fn every_context_has_compressed_suffixes() {
        for ctx in Context::ALL {
            let suffixes = ctx.suffixes();
            assert_eq!(suffixes.len(), 5);
            assert_eq!(suffixes[0], ctx.base_suffix());
            assert!(suffixes.iter().any(|s| s.ends_with(".xz")));
        }
    }

    #[test]
    fn parse_unknown_context_fails() {
        let err = Contexts::builtin().parse("smt").expect_err("unknown");
        assert_eq!(err.kind(), "ConfigurationError");
        assert_eq!("opb".parse::<Context>().ok(), Some(Context::Opb));
    }
}
