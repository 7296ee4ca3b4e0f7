//! Shift transition commands: start, pause, resume and end.
//!
//! Every transition is gated on the worker's position being inside the
//! shift's site geofence. The caller holds the database lock for the whole
//! command.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use sc_core::{
    Coordinate, Shift, ShiftId, ShiftStore, Site, SiteId, Timeclock, UserId, distance_m,
    within_radius,
};
use sc_db::Database;

use super::report::format_duration;
use super::util::{format_clock, format_date, format_timestamp};

/// Refuses the action unless `position` is within the site's radius.
fn ensure_within_radius(site: &Site, position: Coordinate) -> Result<()> {
    if within_radius(position, site) {
        return Ok(());
    }
    tracing::warn!(
        site_id = %site.id(),
        distance_m = ?distance_m(position, site.center()),
        radius_m = site.radius_m(),
        "position outside site radius"
    );
    anyhow::bail!(
        "outside site radius (must be within {:.0}m)",
        site.radius_m()
    );
}

/// Finds the shift to act on: the given one, or the user's active shift.
fn target_shift(db: &Database, user: &UserId, shift_id: Option<&str>) -> Result<Shift> {
    match shift_id {
        Some(raw) => {
            let id = ShiftId::new(raw)?;
            db.shift(&id)?
                .filter(|shift| shift.user_id() == user)
                .with_context(|| format!("shift not found: {id}"))
        }
        None => db
            .active_shift(user)?
            .with_context(|| format!("no active shift for {user}")),
    }
}

/// Loads the shift's site and checks the geofence.
fn gated_site(db: &Database, shift: &Shift, position: Coordinate) -> Result<Site> {
    let site = db
        .site(shift.site_id())?
        .with_context(|| format!("site not found: {}", shift.site_id()))?;
    ensure_within_radius(&site, position)?;
    Ok(site)
}

/// Runs `sc start`.
pub fn start<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user: &UserId,
    site_id: &SiteId,
    position: Coordinate,
    now: DateTime<Utc>,
    shift_id: ShiftId,
) -> Result<()> {
    let site = db
        .site(site_id)?
        .with_context(|| format!("site not found: {site_id}"))?;
    ensure_within_radius(&site, position)?;

    let shift = Timeclock::new(&mut *db).start(shift_id, user, site_id, now)?;
    writeln!(
        writer,
        "Started shift {} at {} ({})",
        shift.id(),
        site.name(),
        format_timestamp(now)
    )?;
    Ok(())
}

/// Runs `sc pause`.
pub fn pause<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user: &UserId,
    shift_id: Option<&str>,
    position: Coordinate,
    now: DateTime<Utc>,
) -> Result<()> {
    let shift = target_shift(db, user, shift_id)?;
    gated_site(db, &shift, position)?;

    let was_paused = shift.is_paused();
    let shift = Timeclock::new(&mut *db).pause(shift.id(), now)?;
    if was_paused {
        writeln!(writer, "Shift {} is already paused", shift.id())?;
    } else {
        writeln!(writer, "Paused shift {} at {}", shift.id(), format_clock(now))?;
    }
    Ok(())
}

/// Runs `sc resume`.
pub fn resume<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user: &UserId,
    shift_id: Option<&str>,
    position: Coordinate,
    now: DateTime<Utc>,
) -> Result<()> {
    let shift = target_shift(db, user, shift_id)?;
    gated_site(db, &shift, position)?;

    let was_paused = shift.is_paused();
    let shift = Timeclock::new(&mut *db).resume(shift.id(), now)?;
    if was_paused {
        writeln!(writer, "Resumed shift {} at {}", shift.id(), format_clock(now))?;
    } else {
        writeln!(writer, "Shift {} is not paused", shift.id())?;
    }
    Ok(())
}

/// Finds the shift to end.
///
/// Without an explicit ID this falls back to the user's most recent shift,
/// so repeating `sc end` reprints the summary of the shift it ended.
fn shift_to_end(db: &Database, user: &UserId, shift_id: Option<&str>) -> Result<Shift> {
    if shift_id.is_some() {
        return target_shift(db, user, shift_id);
    }
    if let Some(active) = db.active_shift(user)? {
        return Ok(active);
    }
    db.list_shifts(user)?
        .pop()
        .with_context(|| format!("no active shift for {user}"))
}

/// Runs `sc end` and prints the shift summary.
pub fn end<W: Write>(
    writer: &mut W,
    db: &mut Database,
    user: &UserId,
    shift_id: Option<&str>,
    position: Coordinate,
    now: DateTime<Utc>,
) -> Result<()> {
    let shift = shift_to_end(db, user, shift_id)?;
    let site = gated_site(db, &shift, position)?;

    let was_ended = !shift.is_active();
    let shift = Timeclock::new(&mut *db).end(shift.id(), now)?;
    if was_ended {
        writeln!(writer, "Shift {} had already ended", shift.id())?;
        writeln!(writer)?;
    }
    write_summary(writer, &shift, site.name())
}

/// Writes the end-of-shift summary block.
pub fn write_summary<W: Write>(writer: &mut W, shift: &Shift, site_name: &str) -> Result<()> {
    let Some(ended_at) = shift.ended_at() else {
        anyhow::bail!("shift {} has not ended", shift.id());
    };
    writeln!(writer, "Shift ended")?;
    writeln!(writer, "  Date:   {}", format_date(shift.started_at()))?;
    writeln!(writer, "  Site:   {site_name}")?;
    writeln!(writer, "  Start:  {}", format_clock(shift.started_at()))?;
    writeln!(writer, "  End:    {}", format_clock(ended_at))?;
    writeln!(
        writer,
        "  Total:  {}",
        format_duration(shift.worked_duration(ended_at).num_milliseconds())
    )?;
    writeln!(
        writer,
        "  Paused: {}",
        format_duration(shift.paused_duration(ended_at).num_milliseconds())
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use insta::assert_snapshot;
    use sc_core::TenantId;

    const CENTER: Coordinate = Coordinate::new(45.40797, 11.88586);
    // About 100 m south of the center, outside the 50 m radius.
    const OUTSIDE: Coordinate = Coordinate::new(45.40707, 11.88586);

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn setup() -> (Database, UserId, SiteId) {
        let mut db = Database::open_in_memory().unwrap();
        let site = Site::new(
            SiteId::new("padova").unwrap(),
            TenantId::new("acme").unwrap(),
            "Padova yard",
            CENTER,
            50.0,
        )
        .unwrap();
        db.upsert_site(&site).unwrap();
        (db, UserId::new("worker-1").unwrap(), site.id().clone())
    }

    fn run_start(
        db: &mut Database,
        user: &UserId,
        site: &SiteId,
        position: Coordinate,
    ) -> Result<String> {
        let mut output = Vec::new();
        start(
            &mut output,
            db,
            user,
            site,
            position,
            at("2025-01-15T09:00:00Z"),
            ShiftId::new("shift-1").unwrap(),
        )?;
        Ok(String::from_utf8(output).unwrap())
    }

    #[test]
    fn full_shift_with_summary() {
        let (mut db, user, site) = setup();
        let started = run_start(&mut db, &user, &site, CENTER).unwrap();
        assert_snapshot!(started, @"Started shift shift-1 at Padova yard (2025-01-15 09:00 UTC)");

        let mut output = Vec::new();
        pause(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T12:00:00Z")).unwrap();
        pause(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T12:05:00Z")).unwrap();
        resume(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T12:45:00Z")).unwrap();
        resume(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T12:50:00Z")).unwrap();
        end(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T17:30:00Z")).unwrap();

        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Paused shift shift-1 at 12:00
        Shift shift-1 is already paused
        Resumed shift shift-1 at 12:45
        Shift shift-1 is not paused
        Shift ended
          Date:   2025-01-15
          Site:   Padova yard
          Start:  09:00
          End:    17:30
          Total:  7h 45m
          Paused: 45m
        ");
    }

    #[test]
    fn start_outside_radius_is_refused() {
        let (mut db, user, site) = setup();
        let err = run_start(&mut db, &user, &site, OUTSIDE).unwrap_err();
        assert_eq!(err.to_string(), "outside site radius (must be within 50m)");
        assert!(db.active_shift(&user).unwrap().is_none());
    }

    #[test]
    fn pause_outside_radius_is_refused() {
        let (mut db, user, site) = setup();
        run_start(&mut db, &user, &site, CENTER).unwrap();

        let mut output = Vec::new();
        let err = pause(&mut output, &mut db, &user, None, OUTSIDE, at("2025-01-15T10:00:00Z"))
            .unwrap_err();
        assert_eq!(err.to_string(), "outside site radius (must be within 50m)");
        assert!(!db.active_shift(&user).unwrap().unwrap().is_paused());
    }

    #[test]
    fn start_on_unknown_or_inactive_site_fails() {
        let (mut db, user, site) = setup();
        let err = run_start(&mut db, &user, &SiteId::new("nowhere").unwrap(), CENTER).unwrap_err();
        assert_eq!(err.to_string(), "site not found: nowhere");

        db.set_site_active(&site, false).unwrap();
        let err = run_start(&mut db, &user, &site, CENTER).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot start shift shift-1: the site is unknown or inactive"
        );
    }

    #[test]
    fn second_start_is_refused() {
        let (mut db, user, site) = setup();
        run_start(&mut db, &user, &site, CENTER).unwrap();

        let mut output = Vec::new();
        let err = start(
            &mut output,
            &mut db,
            &user,
            &site,
            CENTER,
            at("2025-01-15T10:00:00Z"),
            ShiftId::new("shift-2").unwrap(),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot start shift shift-1: an unfinished shift already exists"
        );
    }

    #[test]
    fn repeated_end_reprints_first_summary() {
        let (mut db, user, site) = setup();
        run_start(&mut db, &user, &site, CENTER).unwrap();
        let mut sink = Vec::new();
        end(&mut sink, &mut db, &user, None, CENTER, at("2025-01-15T10:00:00Z")).unwrap();

        let mut output = Vec::new();
        end(
            &mut output,
            &mut db,
            &user,
            Some("shift-1"),
            CENTER,
            at("2025-01-15T11:00:00Z"),
        )
        .unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Shift shift-1 had already ended

        Shift ended
          Date:   2025-01-15
          Site:   Padova yard
          Start:  09:00
          End:    10:00
          Total:  1h 0m
          Paused: 0m
        ");
    }

    #[test]
    fn repeated_end_without_shift_id_reprints_summary() {
        let (mut db, user, site) = setup();
        run_start(&mut db, &user, &site, CENTER).unwrap();
        let mut sink = Vec::new();
        end(&mut sink, &mut db, &user, None, CENTER, at("2025-01-15T10:00:00Z")).unwrap();

        let mut output = Vec::new();
        end(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T11:00:00Z")).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        Shift shift-1 had already ended

        Shift ended
          Date:   2025-01-15
          Site:   Padova yard
          Start:  09:00
          End:    10:00
          Total:  1h 0m
          Paused: 0m
        ");
        assert!(db.active_shift(&user).unwrap().is_none());
    }

    #[test]
    fn acting_without_a_shift_fails() {
        let (mut db, user, _site) = setup();
        let mut output = Vec::new();
        let err = pause(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T10:00:00Z"))
            .unwrap_err();
        assert_eq!(err.to_string(), "no active shift for worker-1");

        let err = end(
            &mut output,
            &mut db,
            &user,
            Some("missing"),
            CENTER,
            at("2025-01-15T10:00:00Z"),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "shift not found: missing");
    }

    #[test]
    fn clock_regression_is_reported() {
        let (mut db, user, site) = setup();
        run_start(&mut db, &user, &site, CENTER).unwrap();
        let mut output = Vec::new();
        let err = pause(&mut output, &mut db, &user, None, CENTER, at("2025-01-15T08:00:00Z"))
            .unwrap_err();
        assert!(err.to_string().starts_with("cannot pause at 2025-01-15 08:00:00 UTC"), "{err}");
    }
}
