//! CLI subcommand implementations.

pub mod report;
pub mod shift;
pub mod sites;
pub mod status;
pub mod util;
