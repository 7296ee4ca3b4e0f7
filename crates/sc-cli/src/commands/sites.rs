//! Site directory commands.
//!
//! `sc sites list` shows active sites, and with a position also how far the
//! worker is from each one and whether they are inside its geofence.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use sc_core::{Coordinate, ShiftStore, Site, SiteId, TenantId, distance_m, within_radius};
use sc_db::Database;

/// Site data for display.
#[derive(Debug, Clone, Serialize)]
pub struct SiteEntry {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_radius: Option<bool>,
}

impl SiteEntry {
    fn new(site: &Site, position: Option<Coordinate>) -> Self {
        Self {
            id: site.id().to_string(),
            tenant_id: site.tenant_id().to_string(),
            name: site.name().to_string(),
            latitude: site.center().latitude,
            longitude: site.center().longitude,
            radius_m: site.radius_m(),
            distance_m: position.and_then(|p| distance_m(p, site.center())),
            within_radius: position.map(|p| within_radius(p, site)),
        }
    }
}

/// Formats a distance in meters, switching to kilometers past 1 km.
pub fn format_distance(meters: f64) -> String {
    if meters >= 1000.0 {
        format!("{:.1}km", meters / 1000.0)
    } else {
        format!("{meters:.0}m")
    }
}

/// Writes the site list as a table.
pub fn write_table<W: Write>(
    writer: &mut W,
    entries: &[SiteEntry],
    with_position: bool,
) -> Result<()> {
    writeln!(writer, "SITES")?;
    writeln!(writer)?;

    if entries.is_empty() {
        writeln!(writer, "No active sites.")?;
        writeln!(writer)?;
        writeln!(writer, "Hint: Use 'sc sites add' to register a site.")?;
        return Ok(());
    }

    if with_position {
        writeln!(
            writer,
            "{:<12}  {:<22}  {:>7}  {:>9}  Inside",
            "ID", "Name", "Radius", "Distance"
        )?;
    } else {
        writeln!(writer, "{:<12}  {:<22}  {:>7}", "ID", "Name", "Radius")?;
    }

    for entry in entries {
        let radius = format_distance(entry.radius_m);
        if with_position {
            let distance = entry
                .distance_m
                .map_or_else(|| "?".to_string(), format_distance);
            let inside = if entry.within_radius == Some(true) {
                "yes"
            } else {
                "no"
            };
            writeln!(
                writer,
                "{:<12}  {:<22}  {:>7}  {:>9}  {inside}",
                entry.id, entry.name, radius, distance
            )?;
        } else {
            writeln!(writer, "{:<12}  {:<22}  {:>7}", entry.id, entry.name, radius)?;
        }
    }

    Ok(())
}

/// Runs `sc sites list`.
pub fn list<W: Write>(
    writer: &mut W,
    db: &Database,
    position: Option<Coordinate>,
    json: bool,
) -> Result<()> {
    let entries: Vec<_> = db
        .list_sites()?
        .iter()
        .map(|site| SiteEntry::new(site, position))
        .collect();

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&entries)?)?;
    } else {
        write_table(writer, &entries, position.is_some())?;
    }
    Ok(())
}

/// Runs `sc sites add`.
pub fn add<W: Write>(
    writer: &mut W,
    db: &mut Database,
    id: &str,
    tenant: &str,
    name: &str,
    center: Coordinate,
    radius_m: f64,
) -> Result<()> {
    let site = Site::new(
        SiteId::new(id)?,
        TenantId::new(tenant)?,
        name,
        center,
        radius_m,
    )
    .context("invalid site")?;
    db.upsert_site(&site).context("failed to store site")?;
    tracing::info!(site_id = %site.id(), "site registered");
    writeln!(
        writer,
        "Registered site {} ({}, radius {})",
        site.id(),
        site.name(),
        format_distance(site.radius_m())
    )?;
    Ok(())
}

/// Runs `sc sites deactivate`.
pub fn deactivate<W: Write>(writer: &mut W, db: &mut Database, id: &str) -> Result<()> {
    let site_id = SiteId::new(id)?;
    if !db.set_site_active(&site_id, false)? {
        anyhow::bail!("site not found: {site_id}");
    }
    tracing::info!(%site_id, "site deactivated");
    writeln!(writer, "Deactivated site {site_id}")?;
    Ok(())
}
