//! Site clock CLI library.
//!
//! This crate provides the `sc` command-line interface over the site clock
//! core and its SQLite store.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, Location, SitesAction};
pub use config::Config;
