//! # gbd
//!
//! Command-line interface and HTTP front-end of the GBD benchmark database.
//!
//! - [`cli`]: clap commands over a [`gbd_core::Session`]
//! - [`api`]: read-only axum server
//! - [`config`]: layered configuration (`gbd.toml`, environment, flags)

pub mod api;
pub mod cli;
pub mod config;
