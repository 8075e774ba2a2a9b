//! # GBD CLI Module
//!
//! This module implements the command-line interface of GBD.
//!
//! ## Available Commands
//!
//! - `get` - Query catalogs and print result rows
//! - `set` - Assign a value to the instances matching a query
//! - `create`, `delete`, `rename`, `copy` - Feature lifecycle
//! - `cleanup` - Remove hashes from all features of a catalog
//! - `import` - Import columns of a comma-delimited file
//! - `info` - List catalogs and features, or summarize one feature
//! - `hash` - Print the hash of one benchmark file
//! - `init` - Register benchmarks and run extractors
//! - `transform` - Derive new benchmarks from existing ones
//! - `serve` - Start the HTTP server
//!
//! Commands taking `--hashes` read them from stdin when none are given and
//! stdin is not a terminal.

mod commands;

use crate::config::GbdConfig;
use clap::{Args, Parser, Subcommand};
use gbd_core::{Contexts, GbdError, Limits, Session};
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// GBD - Global Benchmark Database
///
/// Benchmark instances are identified by content hash and annotated with
/// features stored in SQLite catalogs.
#[derive(Parser, Debug)]
#[command(name = "gbd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Catalog files, separated by the OS path separator (overrides GBD_DB)
    #[arg(short = 'd', long, global = true, value_name = "PATHS")]
    pub db: Option<OsString>,

    /// TOML configuration file (overrides GBD_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(flatten)]
    pub limits: LimitArgs,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Resource limits of extraction runs, overriding `[limits]`.
#[derive(Args, Debug, Default, Clone)]
pub struct LimitArgs {
    /// Number of parallel jobs
    #[arg(short = 'j', long, global = true)]
    pub jobs: Option<usize>,

    /// Time limit (sec) per instance
    #[arg(long, global = true)]
    pub tlim: Option<u64>,

    /// Memory limit (MB) per instance
    #[arg(long, global = true)]
    pub mlim: Option<u64>,

    /// File size limit (MB) per instance for jobs that create files
    #[arg(long, global = true)]
    pub flim: Option<u64>,
}

impl LimitArgs {
    /// `base` with every given flag applied.
    pub fn apply(&self, base: Limits) -> Limits {
        Limits {
            jobs: self.jobs.unwrap_or(base.jobs).max(1),
            tlim: self.tlim.unwrap_or(base.tlim),
            mlim: self.mlim.unwrap_or(base.mlim),
            flim: self.flim.unwrap_or(base.flim),
        }
    }
}

/// Query text plus an explicit hash list.
#[derive(Args, Debug, Default, Clone)]
pub struct Selection {
    /// GBD query
    pub query: Option<String>,

    /// Hashes as arguments or via stdin
    #[arg(long, num_args = 0..)]
    pub hashes: Vec<String>,
}

impl Selection {
    /// Fill `hashes` from stdin when none were given and stdin is piped.
    fn with_stdin_hashes(mut self) -> Result<Self, GbdError> {
        if self.hashes.is_empty() && !std::io::stdin().is_terminal() {
            self.hashes = read_hashes(std::io::stdin().lock())?;
        }
        Ok(self)
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Get data by query (or hash list via stdin)
    Get {
        #[command(flatten)]
        selection: Selection,

        /// Features to resolve
        #[arg(short, long, num_args = 1..)]
        resolve: Vec<String>,

        /// Aggregation of multiple values per group
        #[arg(short, long, default_value = "group_concat")]
        collapse: String,

        /// Group by the given feature (default: context hash)
        #[arg(short, long)]
        group_by: Option<String>,

        /// Treatment of missing values: left, inner or outer
        #[arg(long, default_value = "left")]
        join_type: String,

        /// Evaluate the query in a sub-select
        #[arg(long)]
        subselect: bool,
    },

    /// Set an attribute value for the query result
    Set {
        /// Assignment as key=value
        assign: String,

        #[command(flatten)]
        selection: Selection,

        /// Also create the given hashes if they do not exist yet
        #[arg(long)]
        create: bool,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Create a new feature
    Create {
        /// Name of feature
        name: String,

        /// Unique constraint: default value of the feature
        #[arg(short, long)]
        unique: Option<String>,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Delete values of given hashes or values, or the whole feature
    Delete {
        /// Name of feature
        name: String,

        /// Hashes whose values to delete
        #[arg(long, num_args = 0..)]
        hashes: Vec<String>,

        /// Values to delete
        #[arg(long, num_args = 0..)]
        values: Vec<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Delete given hashes from all features
    Cleanup {
        /// Hashes to delete
        #[arg(long, num_args = 0..)]
        hashes: Vec<String>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Rename a feature
    Rename {
        old_name: String,
        new_name: String,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Copy a feature, optionally restricted to a query result
    Copy {
        old_name: String,
        new_name: String,

        #[command(flatten)]
        selection: Selection,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Import columns of a comma-delimited file as features
    Import {
        /// The file to import
        file: PathBuf,

        /// Column holding the hashes
        #[arg(short, long, default_value = "hash")]
        key: String,

        /// Columns to import
        #[arg(short, long, num_args = 1.., required = true)]
        columns: Vec<String>,

        /// Default of newly created features (multi-valued if absent)
        #[arg(long)]
        default: Option<String>,

        /// Target catalog (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Print info about catalogs and features
    Info {
        /// Print info about the given feature
        name: Option<String>,
    },

    /// Print the hash of a single benchmark file
    Hash {
        /// Path to one benchmark
        path: PathBuf,
    },

    /// Initialize catalog entries
    Init {
        #[command(subcommand)]
        job: InitJob,

        /// Target catalog; determines the target context (default: first in list)
        #[arg(long)]
        target: Option<String>,
    },

    /// Transform benchmarks into new instances
    Transform {
        #[command(subcommand)]
        job: TransformJob,

        /// Target catalog; determines the target context
        #[arg(long)]
        target: Option<String>,
    },

    /// Start HTTP server
    Serve {
        /// Host to bind to (default: `[server] host`)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (default: `[server] port`)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one extraction task read from stdin
    #[command(hide = true)]
    Worker,
}

/// Extraction jobs of `init`.
#[derive(Subcommand, Debug)]
pub enum InitJob {
    /// Register local benchmark files by hash and path
    Local {
        /// Path to benchmarks
        path: PathBuf,

        /// Context of the files (default: the target catalog's)
        #[arg(long)]
        context: Option<String>,
    },

    /// Extract base features of CNF instances
    Base {
        #[command(flatten)]
        selection: Selection,
    },
}

/// Transformers of `transform`.
#[derive(Subcommand, Debug)]
pub enum TransformJob {
    /// Write sanitized copies of CNF instances
    Sanitize {
        #[command(flatten)]
        selection: Selection,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), GbdError> {
    match &cli.command {
        Commands::Worker => return cmd_worker(),
        Commands::Hash { path } => return cmd_hash(path),
        _ => {}
    }

    let config = GbdConfig::load(cli.config.as_deref(), cli.db.as_deref())?;
    let limits = cli.limits.apply(config.limits);
    let mut session = Session::open(config.databases()?, Contexts::builtin())?;
    let json = cli.json;

    let outcome = match cli.command {
        Commands::Get {
            selection,
            resolve,
            collapse,
            group_by,
            join_type,
            subselect,
        } => cmd_get(
            &session,
            &selection.with_stdin_hashes()?,
            resolve,
            &collapse,
            group_by,
            &join_type,
            subselect,
            json,
        ),
        Commands::Set {
            assign,
            selection,
            create,
            target,
        } => cmd_set(
            &mut session,
            &assign,
            &selection.with_stdin_hashes()?,
            create,
            target.as_deref(),
        ),
        Commands::Create {
            name,
            unique,
            target,
        } => cmd_create(&mut session, &name, unique.as_deref(), target.as_deref()),
        Commands::Delete {
            name,
            hashes,
            values,
            force,
            target,
        } => {
            let hashes = stdin_hashes_if_empty(hashes)?;
            cmd_delete(&mut session, &name, &hashes, &values, force, target.as_deref())
        }
        Commands::Cleanup {
            hashes,
            force,
            target,
        } => {
            let hashes = stdin_hashes_if_empty(hashes)?;
            cmd_cleanup(&mut session, &hashes, force, target.as_deref())
        }
        Commands::Rename {
            old_name,
            new_name,
            target,
        } => cmd_rename(&mut session, &old_name, &new_name, target.as_deref()),
        Commands::Copy {
            old_name,
            new_name,
            selection,
            target,
        } => cmd_copy(
            &mut session,
            &old_name,
            &new_name,
            &selection.with_stdin_hashes()?,
            target.as_deref(),
        ),
        Commands::Import {
            file,
            key,
            columns,
            default,
            target,
        } => cmd_import(
            &mut session,
            &file,
            &key,
            &columns,
            default.as_deref(),
            target.as_deref(),
            json,
        ),
        Commands::Info { name } => cmd_info(&session, name.as_deref(), cli.verbose, json),
        Commands::Init { job, target } => {
            let options = run_options(limits, target);
            match job {
                InitJob::Local { path, context } => {
                    cmd_init_local(&mut session, &path, context.as_deref(), &options, json)
                }
                InitJob::Base { selection } => cmd_init_features(
                    &mut session,
                    "base",
                    &selection.with_stdin_hashes()?,
                    &options,
                    json,
                ),
            }
        }
        Commands::Transform { job, target } => {
            let options = run_options(limits, target);
            match job {
                TransformJob::Sanitize { selection } => cmd_transform(
                    &mut session,
                    "sanitize",
                    &selection.with_stdin_hashes()?,
                    &options,
                    json,
                ),
            }
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            return cmd_serve(session, &host, port, config.server.rate_limit).await;
        }
        Commands::Worker | Commands::Hash { .. } => Ok(()),
    };
    outcome?;
    session.close()
}

fn run_options(limits: Limits, target: Option<String>) -> gbd_core::RunOptions {
    gbd_core::RunOptions {
        limits,
        target,
        ..gbd_core::RunOptions::default()
    }
}

fn stdin_hashes_if_empty(hashes: Vec<String>) -> Result<Vec<String>, GbdError> {
    let selection = Selection {
        query: None,
        hashes,
    };
    Ok(selection.with_stdin_hashes()?.hashes)
}

/// Whitespace-separated hashes from `input`.
pub fn read_hashes(mut input: impl std::io::Read) -> Result<Vec<String>, GbdError> {
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_flags_override_configured_limits() {
        let args = LimitArgs {
            jobs: Some(4),
            tlim: None,
            mlim: Some(512),
            flim: None,
        };
        let limits = args.apply(Limits::default());
        assert_eq!(limits.jobs, 4);
        assert_eq!(limits.mlim, 512);
        assert_eq!(limits.tlim, Limits::default().tlim);
    }

    #[test]
    fn zero_jobs_runs_sequentially() {
        let args = LimitArgs {
            jobs: Some(0),
            ..LimitArgs::default()
        };
        assert_eq!(args.apply(Limits::default()).jobs, 1);
    }

    #[test]
    fn hashes_are_whitespace_separated() {
        let hashes = read_hashes("a1 b2\n\tc3\n\n".as_bytes()).expect("read");
        assert_eq!(hashes, vec!["a1", "b2", "c3"]);
    }

    #[test]
    fn cli_parses_get_with_resolve_list() {
        let cli = Cli::try_parse_from([
            "gbd", "get", "family = crypto", "-r", "runtime", "family", "-c", "min",
        ])
        .expect("parse");
        let Commands::Get {
            selection,
            resolve,
            collapse,
            ..
        } = cli.command
        else {
            unreachable!("parsed another command")
        };
        assert_eq!(selection.query.as_deref(), Some("family = crypto"));
        assert_eq!(resolve, vec!["runtime", "family"]);
        assert_eq!(collapse, "min");
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gbd", "init", "local", "bench", "-j", "4", "--db", "a.db"])
            .expect("parse");
        assert_eq!(cli.limits.jobs, Some(4));
        assert_eq!(cli.db.as_deref(), Some(std::ffi::OsStr::new("a.db")));
        assert!(matches!(
            cli.command,
            Commands::Init {
                job: InitJob::Local { .. },
                ..
            }
        ));
    }

    #[test]
    fn worker_command_is_hidden_but_parses() {
        let cli = Cli::try_parse_from(["gbd", "worker"]).expect("parse");
        assert!(matches!(cli.command, Commands::Worker));
    }
}
