//! Report command listing a worker's shifts with worked and paused totals.

use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use sc_core::{Shift, ShiftState, ShiftStore, Site, UserId};
use sc_db::Database;

use super::util::{format_clock, format_date};

/// Site label used when a shift's site is no longer in the directory.
const UNKNOWN_SITE: &str = "??";

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

/// Formats a duration in milliseconds as `"Hh Mm"`, rounded to the nearest minute.
///
/// Hours are omitted when zero. Negative durations format as `0m`.
pub fn format_duration(ms: i64) -> String {
    if ms < 0 {
        return "0m".to_string();
    }
    let total_minutes = ms.saturating_add(30_000) / 60_000;
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

// ========== Report Data ==========

/// One shift as shown in the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportRow {
    pub shift_id: String,
    pub date: String,
    pub site: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub state: ShiftState,
    pub worked_ms: i64,
    pub paused_ms: i64,
}

/// Builds report rows, computing open shifts up to `as_of`.
pub fn build_rows(shifts: &[Shift], sites: &[Site], as_of: DateTime<Utc>) -> Vec<ReportRow> {
    let names: HashMap<_, _> = sites.iter().map(|s| (s.id(), s.name())).collect();
    shifts
        .iter()
        .map(|shift| ReportRow {
            shift_id: shift.id().to_string(),
            date: format_date(shift.started_at()),
            site: names
                .get(shift.site_id())
                .map_or_else(|| UNKNOWN_SITE.to_string(), |name| (*name).to_string()),
            started_at: shift.started_at(),
            ended_at: shift.ended_at(),
            state: shift.state(),
            worked_ms: shift.worked_duration(as_of).num_milliseconds(),
            paused_ms: shift.paused_duration(as_of).num_milliseconds(),
        })
        .collect()
}

// ========== Human-Readable Output ==========

fn truncate(name: &str, width: usize) -> String {
    // Truncate by characters, not bytes, to avoid panics on multi-byte UTF-8
    if name.chars().count() > width {
        format!("{}...", name.chars().take(width - 3).collect::<String>())
    } else {
        name.to_string()
    }
}

/// Writes the report as a table.
pub fn write_table<W: Write>(writer: &mut W, user: &UserId, rows: &[ReportRow]) -> Result<()> {
    writeln!(writer, "SHIFTS for {user}")?;
    writeln!(writer)?;

    if rows.is_empty() {
        writeln!(writer, "No shifts recorded.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<10}  {:<20}  {:<5}  {:<5}  {:>7}  {:>7}",
        "Date", "Site", "Start", "End", "Total", "Pause"
    )?;
    writeln!(
        writer,
        "──────────  ────────────────────  ─────  ─────  ───────  ───────"
    )?;

    let mut total_worked = 0;
    for row in rows {
        let end = row.ended_at.map_or_else(|| "-".to_string(), format_clock);
        writeln!(
            writer,
            "{:<10}  {:<20}  {:<5}  {:<5}  {:>7}  {:>7}",
            row.date,
            truncate(&row.site, 20),
            format_clock(row.started_at),
            end,
            format_duration(row.worked_ms),
            format_duration(row.paused_ms),
        )?;
        total_worked += row.worked_ms;
    }

    writeln!(writer)?;
    writeln!(writer, "Total worked: {}", format_duration(total_worked))?;
    Ok(())
}

// ========== CSV Output ==========

/// Quotes a CSV field, doubling embedded quotes.
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Writes the report as CSV with every field quoted.
pub fn write_csv<W: Write>(writer: &mut W, rows: &[ReportRow]) -> Result<()> {
    writeln!(writer, "Date,Site,Start,End,Total,Pause")?;
    for row in rows {
        let end = row.ended_at.map(format_clock).unwrap_or_default();
        let fields = [
            row.date.clone(),
            row.site.clone(),
            format_clock(row.started_at),
            end,
            format_duration(row.worked_ms),
            format_duration(row.paused_ms),
        ];
        let line: Vec<_> = fields.iter().map(|f| csv_field(f)).collect();
        writeln!(writer, "{}", line.join(","))?;
    }
    Ok(())
}

// ========== JSON Output ==========

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    user_id: &'a str,
    generated_at: DateTime<Utc>,
    shifts: &'a [ReportRow],
}

/// Writes the report as pretty-printed JSON.
pub fn write_json<W: Write>(
    writer: &mut W,
    user: &UserId,
    rows: &[ReportRow],
    as_of: DateTime<Utc>,
) -> Result<()> {
    let report = JsonReport {
        user_id: user.as_str(),
        generated_at: as_of,
        shifts: rows,
    };
    writeln!(writer, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(())
}

// ========== Public Interface ==========

/// Runs the report command.
pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    user: &UserId,
    as_of: DateTime<Utc>,
    format: OutputFormat,
) -> Result<()> {
    let shifts = db.list_shifts(user)?;
    let sites = db.all_sites()?;
    let rows = build_rows(&shifts, &sites, as_of);
    tracing::debug!(user_id = %user, shifts = rows.len(), "report built");

    match format {
        OutputFormat::Table => write_table(writer, user, &rows),
        OutputFormat::Json => write_json(writer, user, &rows, as_of),
        OutputFormat::Csv => write_csv(writer, &rows),
    }
}
