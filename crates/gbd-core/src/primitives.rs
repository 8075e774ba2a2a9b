//! # Primitives
//!
//! Hardcoded runtime constants for the GBD engine.
//!
//! These values are part of the on-disk interchange contract (sentinels,
//! reserved names, table names) or bound the size of generated SQL.

/// Number of hashes bound into one SQL statement by batched mutations.
pub const CHUNK_SIZE: usize = 1000;

/// Existence sentinel stored in multi-valued tables and foreign-key columns.
///
/// A `('None', 'None')` row keeps the table non-empty; a foreign-key column
/// holding `None` means "no value for this hash".
pub const NONE_SENTINEL: &str = "None";

/// Default assigned to features created lazily by the extraction runner.
pub const DEFAULT_FEATURE_VALUE: &str = "empty";

/// Name of the per-context main table (unprefixed form).
pub const MAIN_TABLE: &str = "features";

/// Name of the synthetic catalog holding imported tabular files.
pub const IMPORTED_CATALOG: &str = "imported";

/// Header every SQLite 3 database file starts with.
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// Size of the SQLite file header; shorter non-empty files are not databases.
pub const SQLITE_HEADER_SIZE: u64 = 100;

/// SQLite release that introduced `ALTER TABLE ... DROP COLUMN` (3.35.0).
pub const DROP_COLUMN_MIN_VERSION: i32 = 3_035_000;

/// Savepoint wrapping every catalog mutation.
pub const MUTATION_SAVEPOINT: &str = "gbd_mutation";

// =============================================================================
// RESERVED NAMES
// =============================================================================

/// Feature names with a fixed meaning; only the system may create them.
pub const RESERVED_NAMES: &[&str] = &["hash", "value", "local", "filename", "features"];

/// SQL keywords that cannot be used as feature names.
pub const SQL_KEYWORDS: &[&str] = &[
    "abort", "action", "add", "after", "all", "alter", "always", "analyze", "and", "as", "asc",
    "attach", "autoincrement", "before", "begin", "between", "by", "cascade", "case", "cast",
    "check", "collate", "column", "commit", "conflict", "constraint", "create", "cross", "current",
    "current_date", "current_time", "current_timestamp", "database", "default", "deferrable",
    "deferred", "delete", "desc", "detach", "distinct", "do", "drop", "each", "else", "end",
    "escape", "except", "exclude", "exclusive", "exists", "explain", "fail", "filter", "first",
    "following", "for", "foreign", "from", "full", "generated", "glob", "group", "groups",
    "having", "if", "ignore", "immediate", "in", "index", "indexed", "initially", "inner",
    "insert", "instead", "intersect", "into", "is", "isnull", "join", "key", "last", "left",
    "like", "limit", "match", "materialized", "natural", "no", "not", "nothing", "notnull",
    "null", "nulls", "of", "offset", "on", "or", "order", "others", "outer", "over", "partition",
    "plan", "pragma", "preceding", "primary", "query", "raise", "range", "recursive",
    "references", "regexp", "reindex", "release", "rename", "replace", "restrict", "returning",
    "right", "rollback", "row", "rows", "savepoint", "select", "set", "table", "temp",
    "temporary", "then", "ties", "to", "transaction", "trigger", "unbounded", "union", "unique",
    "unlike", "update", "using", "vacuum", "values", "view", "virtual", "when", "where", "window",
    "with", "without",
];

/// Returns `true` if `name` is one of the [`SQL_KEYWORDS`] (case-insensitive).
#[must_use]
pub fn is_sql_keyword(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SQL_KEYWORDS.contains(&lower.as_str())
}

/// Returns `true` if `name` is one of the [`RESERVED_NAMES`] (case-insensitive).
#[must_use]
pub fn is_reserved_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESERVED_NAMES.contains(&lower.as_str())
}

/// Render `value` as a single-quoted SQL string literal.
#[must_use]
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Comma-separated list of SQL string literals.
#[must_use]
pub fn sql_literal_list<S: AsRef<str>>(values: &[S]) -> String {
    values
        .iter()
        .map(|v| sql_literal(v.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}
