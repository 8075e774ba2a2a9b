//! # gbd-core
//!
//! The benchmark metadata engine for GBD.
//!
//! Benchmark files (SAT formulas and related problem families) are
//! identified by a content hash and annotated with named features stored
//! in SQLite catalogs. A federation of catalogs is queried with a small
//! boolean/arithmetic language compiled to SQL.
//!
//! ## Layout
//!
//! - `context`, `hasher`: problem families and their canonical hashes
//! - `schema`, `store`: catalog introspection and the federated store
//! - `query`: the query language and its SQL compiler
//! - `mutation`: feature lifecycle and value writes
//! - `runner`, `extractors`, `init`: parallel extraction into catalogs
//! - `session`: the high-level interface used by the application
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - One session owns one connection; statements run serially
//! - The only parallelism is the process pool of the extraction runner

// =============================================================================
// MODULES
// =============================================================================

pub mod context;
pub mod extractors;
pub mod hasher;
pub mod init;
pub mod mutation;
pub mod primitives;
pub mod query;
pub mod runner;
pub mod schema;
pub mod session;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types
// =============================================================================

pub use types::{FeatureRecord, GbdError, Limits, QueryResult, Result, Task, Value};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use context::{Context, Contexts};
pub use query::{Collapse, CompiledQuery, JoinType, Query, QuerySpec, compile, parse};
pub use schema::{FeatureInfo, Schema, dbname_from_path};
pub use session::{FeatureStats, Session};
pub use store::Database;

// =============================================================================
// RE-EXPORTS: Extraction
// =============================================================================

pub use init::{init_features, init_local, transform};
pub use runner::{RunOptions, RunSummary, TaskFailure, TaskFunction, WorkerCommand};
