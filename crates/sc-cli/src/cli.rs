//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sc_core::Coordinate;

/// Geofenced shift clock.
///
/// Workers start, pause, resume and end shifts at registered sites. Every
/// action checks that the worker's reported position is within the site's
/// radius.
#[derive(Debug, Parser)]
#[command(name = "sc", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Worker identity. Overrides `user_id` from the configuration.
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the site directory.
    #[command(subcommand)]
    Sites(SitesAction),

    /// Start a shift at a site.
    Start {
        /// The site to clock in at.
        #[arg(long)]
        site: String,

        #[command(flatten)]
        location: Location,

        /// Time of the action (ISO 8601 or relative like "5 minutes ago").
        #[arg(long)]
        at: Option<String>,
    },

    /// Pause the active shift.
    Pause {
        #[command(flatten)]
        location: Location,

        /// Time of the action (ISO 8601 or relative like "5 minutes ago").
        #[arg(long)]
        at: Option<String>,

        /// Shift to act on instead of the user's active shift.
        #[arg(long)]
        shift: Option<String>,
    },

    /// Resume the paused shift.
    Resume {
        #[command(flatten)]
        location: Location,

        /// Time of the action (ISO 8601 or relative like "5 minutes ago").
        #[arg(long)]
        at: Option<String>,

        /// Shift to act on instead of the user's active shift.
        #[arg(long)]
        shift: Option<String>,
    },

    /// End the active shift and print its summary.
    End {
        #[command(flatten)]
        location: Location,

        /// Time of the action (ISO 8601 or relative like "5 minutes ago").
        #[arg(long)]
        at: Option<String>,

        /// Shift to act on instead of the user's active shift.
        #[arg(long)]
        shift: Option<String>,
    },

    /// Show the active shift.
    Status {
        /// Instant to compute durations at (defaults to now).
        #[arg(long)]
        at: Option<String>,
    },

    /// List the user's shifts with worked and paused totals.
    Report {
        /// Output as JSON.
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Output as CSV.
        #[arg(long)]
        csv: bool,

        /// Instant to compute open shift totals at (defaults to now).
        #[arg(long)]
        at: Option<String>,
    },
}

/// Site directory actions.
#[derive(Debug, Subcommand)]
pub enum SitesAction {
    /// List active sites, optionally with the distance from a position.
    List {
        /// Latitude of the worker, in degrees.
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,

        /// Longitude of the worker, in degrees.
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Register a site, or replace the one with the same ID.
    Add {
        /// Site identifier.
        id: String,

        /// Display name.
        #[arg(long)]
        name: String,

        /// Owning tenant.
        #[arg(long, default_value = "default")]
        tenant: String,

        /// Latitude of the site center, in degrees.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude of the site center, in degrees.
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        /// Geofence radius in meters.
        #[arg(long)]
        radius: f64,
    },

    /// Hide a site from workers. Existing shifts keep their site.
    Deactivate {
        /// Site identifier.
        id: String,
    },
}

/// The worker's reported position.
#[derive(Debug, Clone, Copy, Args)]
pub struct Location {
    /// Latitude, in degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f64,

    /// Longitude, in degrees.
    #[arg(long, allow_hyphen_values = true)]
    pub lon: f64,
}

impl From<Location> for Coordinate {
    fn from(location: Location) -> Self {
        Self::new(location.lat, location.lon)
    }
}
