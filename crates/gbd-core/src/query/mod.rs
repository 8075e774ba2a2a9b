//! # Query Module
//!
//! The GBD query language and its compilation to SQL.
//!
//! ```text
//! query      := query ('and'|'or') query | '(' query ')' | sconstraint | aconstraint
//! sconstraint:= ident ('='|'!=') string | ident ('like'|'unlike') ['%'] string ['%']
//! aconstraint:= term ('='|'!='|'<='|'>='|'<'|'>') term
//! term       := ident | number | '(' term ('+'|'-'|'*'|'/') term ')'
//! ```
//!
//! `and` binds tighter than `or`. Keywords are case-insensitive.
//! Identifiers may be qualified as `ctx:name` or `db:name`.

pub mod compiler;
pub mod parser;

pub use compiler::{Collapse, CompiledQuery, JoinType, QuerySpec, compile};
pub use parser::parse;

use crate::primitives::sql_literal;
use crate::types::Result;
use std::collections::BTreeSet;
use std::fmt;

// =============================================================================
// AST
// =============================================================================

/// Parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    /// Explicitly parenthesized sub-query.
    Group(Box<Query>),
    /// `feature = value` / `feature != value` on text.
    Str {
        feature: String,
        negated: bool,
        value: String,
    },
    /// `feature like pattern` / `feature unlike pattern`.
    Like {
        feature: String,
        negated: bool,
        pattern: String,
    },
    /// Numeric comparison of two terms.
    Compare { left: Term, op: CmpOp, right: Term },
}

/// Arithmetic term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Feature(String),
    /// Numeric literal, kept verbatim.
    Number(String),
    Binary {
        left: Box<Term>,
        op: ArithOp,
        right: Box<Term>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// FEATURES & SQL
// =============================================================================

impl Term {
    fn collect_features(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Feature(name) => {
                out.insert(name.clone());
            }
            Self::Number(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_features(out);
                right.collect_features(out);
            }
        }
    }

    fn to_sql(&self, resolve: &mut dyn FnMut(&str) -> Result<String>) -> Result<String> {
        Ok(match self {
            Self::Feature(name) => format!("CAST({} AS FLOAT)", resolve(name)?),
            Self::Number(n) => n.clone(),
            Self::Binary { left, op, right } => {
                format!("({} {op} {})", left.to_sql(resolve)?, right.to_sql(resolve)?)
            }
        })
    }
}

impl Query {
    /// All feature identifiers referenced by the query.
    #[must_use]
    pub fn features(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_features(&mut out);
        out
    }

    fn collect_features(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::And(l, r) | Self::Or(l, r) => {
                l.collect_features(out);
                r.collect_features(out);
            }
            Self::Group(q) => q.collect_features(out),
            Self::Str { feature, .. } | Self::Like { feature, .. } => {
                out.insert(feature.clone());
            }
            Self::Compare { left, right, .. } => {
                left.collect_features(out);
                right.collect_features(out);
            }
        }
    }

    /// `true` if the top-level operator is `or`.
    #[must_use]
    pub const fn is_disjunction(&self) -> bool {
        matches!(self, Self::Or(..))
    }

    /// SQL predicate; `resolve` maps a feature to its `db.table.column`.
    pub fn to_sql(&self, resolve: &mut dyn FnMut(&str) -> Result<String>) -> Result<String> {
        Ok(match self {
            Self::And(l, r) => format!("{} AND {}", l.to_sql(resolve)?, r.to_sql(resolve)?),
            Self::Or(l, r) => format!("{} OR {}", l.to_sql(resolve)?, r.to_sql(resolve)?),
            Self::Group(q) => format!("({})", q.to_sql(resolve)?),
            Self::Str {
                feature,
                negated,
                value,
            } => format!(
                "{} {} {}",
                resolve(feature)?,
                if *negated { "!=" } else { "=" },
                sql_literal(value)
            ),
            Self::Like {
                feature,
                negated,
                pattern,
            } => format!(
                "{} {} {}",
                resolve(feature)?,
                if *negated { "NOT LIKE" } else { "LIKE" },
                sql_literal(pattern)
            ),
            Self::Compare { left, op, right } => {
                format!("{} {op} {}", left.to_sql(resolve)?, right.to_sql(resolve)?)
            }
        })
    }
}
