//! # Configuration
//!
//! Layered configuration of the `gbd` binary, lowest to highest precedence:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `--config`, else `GBD_CONFIG`, else `./gbd.toml` if present
//! 3. `GBD_DB` (catalog paths, OS path-separator delimited)
//! 4. `--db` (same delimiter)
//!
//! ```toml
//! databases = ["meta.db", "kis_meta.db"]
//!
//! [limits]
//! jobs = 4
//! tlim = 600
//!
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//! ```

use gbd_core::{GbdError, Limits};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "gbd.toml";

/// Default server rate limit in requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

// =============================================================================
// CONFIG TYPES
// =============================================================================

/// HTTP front-end settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Requests per second; `0` disables rate limiting.
    pub rate_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Complete configuration after layering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdConfig {
    /// Catalog paths in precedence order.
    pub databases: Vec<PathBuf>,
    pub limits: Limits,
    pub server: ServerConfig,
}

impl GbdConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, GbdError> {
        toml::from_str(text)
            .map_err(|e| GbdError::Configuration(format!("Malformed config file: {e}")))
    }

    /// Read the TOML file at `path`. Relative catalog paths are taken
    /// relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, GbdError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GbdError::Configuration(format!("Unable to read config '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&text)?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            for db in &mut config.databases {
                if db.is_relative() {
                    *db = dir.join(&*db);
                }
            }
        }
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Apply all layers. `file` is the explicit config path (`--config` or
    /// `GBD_CONFIG`); without it `./gbd.toml` is used when present.
    pub fn layered(
        file: Option<&Path>,
        env_db: Option<&OsStr>,
        flag_db: Option<&OsStr>,
    ) -> Result<Self, GbdError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        for list in [env_db, flag_db].into_iter().flatten() {
            let paths = split_db_list(list);
            if !paths.is_empty() {
                config.databases = paths;
            }
        }
        Ok(config)
    }

    /// Layer the process environment and the CLI flags.
    pub fn load(config_flag: Option<&Path>, db_flag: Option<&OsStr>) -> Result<Self, GbdError> {
        let env_config = std::env::var_os("GBD_CONFIG").map(PathBuf::from);
        let file = config_flag.or(env_config.as_deref());
        let env_db = std::env::var_os("GBD_DB");
        Self::layered(file, env_db.as_deref(), db_flag)
    }

    /// The catalog list; empty is a configuration error.
    pub fn databases(&self) -> Result<&[PathBuf], GbdError> {
        if self.databases.is_empty() {
            return Err(GbdError::Configuration(
                "No catalogs given: set GBD_DB, pass --db or list databases in gbd.toml"
                    .to_string(),
            ));
        }
        Ok(&self.databases)
    }
}

/// Split a path list on the OS path separator, dropping empty entries.
pub fn split_db_list(list: &OsStr) -> Vec<PathBuf> {
    std::env::split_paths(list)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_layers() {
        let config = GbdConfig::default();
        assert!(config.databases.is_empty());
        assert_eq!(config.limits, Limits::default());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.databases().map_err(|e| e.kind()), Err("ConfigurationError"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = GbdConfig::from_toml("[limits]\njobs = 4\n").expect("parse");
        assert_eq!(config.limits.jobs, 4);
        assert_eq!(config.limits.tlim, Limits::default().tlim);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = GbdConfig::from_toml("databases = 3").expect_err("type mismatch");
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn split_drops_empty_entries() {
        let joined = std::env::join_paths(["a.db", "", "b.db"]).expect("join");
        assert_eq!(
            split_db_list(&joined),
            vec![PathBuf::from("a.db"), PathBuf::from("b.db")]
        );
    }
}
