//! # Query Compiler
//!
//! Turns a query plus its resolve list into one SQL `SELECT` over the
//! attached catalogs. Joins start from the table of the group-by feature
//! and are chosen per feature location:
//!
//! - same context, main table: join on `hash`
//! - same context, multi-valued: join the main table, then follow its
//!   foreign-key column
//! - other context: always `INNER JOIN` through a `to_<ctx>` translator

use super::parse;
use crate::context::Context;
use crate::primitives::{NONE_SENTINEL, sql_literal_list};
use crate::schema::FeatureInfo;
use crate::store::Database;
use crate::types::{GbdError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

// =============================================================================
// OPTIONS
// =============================================================================

/// Join type for same-context joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Left,
    Inner,
    Outer,
}

impl JoinType {
    #[must_use]
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Left => "LEFT JOIN",
            Self::Inner => "INNER JOIN",
            Self::Outer => "FULL OUTER JOIN",
        }
    }
}

impl FromStr for JoinType {
    type Err = GbdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "inner" => Ok(Self::Inner),
            "outer" => Ok(Self::Outer),
            other => Err(GbdError::Configuration(format!(
                "Unknown join type '{other}' (expected left, inner or outer)"
            ))),
        }
    }
}

/// Aggregation applied to every output column when grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collapse {
    #[default]
    GroupConcat,
    Min,
    Max,
    Avg,
    Count,
    Sum,
    /// No aggregation and no `GROUP BY`.
    None,
}

impl Collapse {
    /// SQL aggregate function, `None` when not collapsing.
    #[must_use]
    pub const fn function(self) -> Option<&'static str> {
        match self {
            Self::GroupConcat => Some("GROUP_CONCAT"),
            Self::Min => Some("MIN"),
            Self::Max => Some("MAX"),
            Self::Avg => Some("AVG"),
            Self::Count => Some("COUNT"),
            Self::Sum => Some("SUM"),
            Self::None => None,
        }
    }
}

impl FromStr for Collapse {
    type Err = GbdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "group_concat" => Ok(Self::GroupConcat),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "avg" => Ok(Self::Avg),
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "none" | "null" => Ok(Self::None),
            other => Err(GbdError::Configuration(format!(
                "Unknown collapse function '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Collapse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GroupConcat => "group_concat",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::None => "none",
        };
        write!(f, "{s}")
    }
}

/// Everything needed to compile one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Query text; `None` or blank selects everything.
    pub query: Option<String>,
    /// Restrict the result to these hashes.
    pub hashes: Vec<String>,
    /// Features to emit after the group-by column.
    pub resolve: Vec<String>,
    /// Group-by feature; defaults to the context hash of the first
    /// resolved feature.
    pub group_by: Option<String>,
    pub join_type: JoinType,
    pub collapse: Collapse,
    /// Evaluate the predicate in a sub-select over the group-by table.
    pub subselect: bool,
}

impl QuerySpec {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn resolve<S: Into<String>>(mut self, features: impl IntoIterator<Item = S>) -> Self {
        self.resolve = features.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn hashes<S: Into<String>>(mut self, hashes: impl IntoIterator<Item = S>) -> Self {
        self.hashes = hashes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn group_by(mut self, feature: impl Into<String>) -> Self {
        self.group_by = Some(feature.into());
        self
    }

    #[must_use]
    pub const fn join_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    #[must_use]
    pub const fn collapse(mut self, collapse: Collapse) -> Self {
        self.collapse = collapse;
        self
    }
}

/// SQL text plus output column labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledQuery {
    pub sql: String,
    pub columns: Vec<String>,
}

// =============================================================================
// COMPILATION
// =============================================================================

/// Compile `spec` against the catalogs of `db`.
pub fn compile(db: &Database, spec: &QuerySpec) -> Result<CompiledQuery> {
    let ast = match spec.query.as_deref() {
        Some(text) => parse(text)?,
        None => None,
    };

    let group_label = match &spec.group_by {
        Some(g) => g.clone(),
        None => match spec.resolve.first() {
            Some(first) => format!("{}:hash", db.find(first)?.context),
            None => "hash".to_string(),
        },
    };
    let group = db.find(&group_label)?;

    let mut referenced: Vec<&FeatureInfo> = Vec::new();
    for name in &spec.resolve {
        referenced.push(db.find(name)?);
    }
    let query_features: Vec<&FeatureInfo> = match &ast {
        Some(q) => q
            .features()
            .iter()
            .map(|name| db.find(name))
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    referenced.extend(query_features.iter().copied());

    let mut select = Vec::with_capacity(spec.resolve.len() + 1);
    select.push(group.address());
    for name in &spec.resolve {
        select.push(db.find(name)?.address());
    }
    if let Some(function) = spec.collapse.function() {
        for column in &mut select {
            *column = format!("{function}(DISTINCT {column})");
        }
    }

    let from = Joins::build(db, group, &referenced, spec.join_type)?;

    let gtable = group.table_address();
    let mut conditions = vec![format!("{} != '{NONE_SENTINEL}'", group.address())];
    if let Some(q) = &ast {
        let mut resolve = |name: &str| db.find(name).map(FeatureInfo::address);
        let predicate = q.to_sql(&mut resolve)?;
        if spec.subselect {
            let inner = Joins::build(db, group, &query_features, JoinType::Left)?;
            conditions.push(format!(
                "{gtable}.hash IN (SELECT {gtable}.hash {inner} WHERE {predicate})"
            ));
        } else if q.is_disjunction() {
            conditions.push(format!("({predicate})"));
        } else {
            conditions.push(predicate);
        }
    }
    if !spec.hashes.is_empty() {
        conditions.push(format!(
            "{gtable}.hash IN ({})",
            sql_literal_list(&spec.hashes)
        ));
    }

    let mut sql = format!(
        "SELECT DISTINCT {} {from} WHERE {}",
        select.join(", "),
        conditions.join(" AND ")
    );
    if spec.collapse.function().is_some() {
        sql.push_str(&format!(" GROUP BY {}", group.address()));
    }
    sql.push_str(&format!(" ORDER BY {}", group.address()));
    debug!(%sql, "Compiled query");

    let mut columns = Vec::with_capacity(spec.resolve.len() + 1);
    columns.push(group_label);
    columns.extend(spec.resolve.iter().cloned());
    Ok(CompiledQuery { sql, columns })
}

/// FROM clause builder; each table is joined at most once.
struct Joins<'a> {
    db: &'a Database,
    group: &'a FeatureInfo,
    join: &'static str,
    joined: Vec<String>,
    clauses: Vec<String>,
}

impl<'a> Joins<'a> {
    fn build(
        db: &'a Database,
        group: &'a FeatureInfo,
        features: &[&FeatureInfo],
        join_type: JoinType,
    ) -> Result<String> {
        let gtable = group.table_address();
        let mut joins = Self {
            db,
            group,
            join: join_type.sql(),
            joined: vec![gtable.clone()],
            clauses: vec![format!("FROM {gtable}")],
        };
        for feature in features {
            if joins.is_joined(&feature.table_address()) {
                continue;
            }
            if feature.context == group.context {
                joins.same_context(feature)?;
            } else {
                joins.cross_context(feature)?;
            }
        }
        Ok(joins.clauses.join(" "))
    }

    fn is_joined(&self, table: &str) -> bool {
        self.joined.iter().any(|t| t == table)
    }

    fn push(&mut self, table: String, clause: String) {
        self.joined.push(table);
        self.clauses.push(clause);
    }

    fn same_context(&mut self, feature: &FeatureInfo) -> Result<()> {
        let gtable = self.group.table_address();
        let ftable = feature.table_address();
        match &feature.fk {
            Some(fk) if !feature.main => {
                let schema = self.db.schema(&feature.database)?;
                let main = format!("{}.{}", feature.database, schema.main_table(feature.context));
                if !self.is_joined(&main) {
                    let clause = format!("{} {main} ON {gtable}.hash = {main}.hash", self.join);
                    self.push(main.clone(), clause);
                }
                let clause = format!("{} {ftable} ON {main}.{fk} = {ftable}.hash", self.join);
                self.push(ftable, clause);
            }
            _ => {
                let clause = format!("{} {ftable} ON {gtable}.hash = {ftable}.hash", self.join);
                self.push(ftable, clause);
            }
        }
        Ok(())
    }

    fn cross_context(&mut self, feature: &FeatureInfo) -> Result<()> {
        let gtable = self.group.table_address();
        let ftable = feature.table_address();
        let (translator, forward) = self.translator(self.group.context, feature.context)?;
        let ttable = translator.table_address();
        // forward: translator maps group-context hashes to feature-context hashes
        let (near, far) = if forward {
            ("hash", "value")
        } else {
            ("value", "hash")
        };
        if !self.is_joined(&ttable) {
            let clause = format!("INNER JOIN {ttable} ON {gtable}.hash = {ttable}.{near}");
            self.push(ttable.clone(), clause);
        }
        let clause = format!("INNER JOIN {ftable} ON {ttable}.{far} = {ftable}.hash");
        self.push(ftable, clause);
        Ok(())
    }

    /// Translator between `source` and `target`; `true` if it maps
    /// `source` hashes to `target` hashes.
    fn translator(&self, source: Context, target: Context) -> Result<(&'a FeatureInfo, bool)> {
        let lookup = |ctx: Context, to: Context| {
            self.db
                .bindings(&format!("to_{to}"))
                .iter()
                .find(|f| f.context == ctx && f.column == "value" && !f.is_virtual)
        };
        if let Some(t) = lookup(source, target) {
            return Ok((t, true));
        }
        if let Some(t) = lookup(target, source) {
            return Ok((t, false));
        }
        Err(GbdError::Resolution(format!(
            "No translator table found for contexts {source} and {target}"
        )))
    }
}
