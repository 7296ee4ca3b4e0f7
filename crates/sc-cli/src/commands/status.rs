//! Status command for showing the worker's active shift.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};

use sc_core::{ShiftState, ShiftStore, UserId};
use sc_db::Database;

use super::report::format_duration;
use super::util::format_timestamp;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    user: &UserId,
    as_of: DateTime<Utc>,
) -> Result<()> {
    let Some(shift) = db.active_shift(user)? else {
        writeln!(writer, "No active shift for {user}.")?;
        return Ok(());
    };
    let site = db
        .site(shift.site_id())?
        .map_or_else(|| shift.site_id().to_string(), |site| site.name().to_string());
    let state = match shift.state() {
        ShiftState::Paused => "paused",
        ShiftState::Active | ShiftState::Ended => "working",
    };

    writeln!(writer, "Active shift: {}", shift.id())?;
    writeln!(writer, "  Site:    {site}")?;
    writeln!(writer, "  Started: {}", format_timestamp(shift.started_at()))?;
    writeln!(writer, "  State:   {state}")?;
    writeln!(
        writer,
        "  Worked:  {}",
        format_duration(shift.worked_duration(as_of).num_milliseconds())
    )?;
    writeln!(
        writer,
        "  Paused:  {}",
        format_duration(shift.paused_duration(as_of).num_milliseconds())
    )?;
    Ok(())
}
