//! Geofence membership check.
//!
//! Distances are great-circle (haversine) distances on the mean earth
//! radius, which is accurate to well under a meter for site radii of a few
//! hundred meters. The check gates UI actions, so malformed input never
//! errors: it simply reports "not within radius".

use geo::{Distance, Haversine, Point};
use serde::{Deserialize, Serialize};

use crate::site::Site;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns true if both components are finite and within WGS84 bounds.
    pub fn is_valid(self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    fn to_point(self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }
}

/// Great-circle distance in meters, or `None` if either coordinate is malformed.
pub fn distance_m(a: Coordinate, b: Coordinate) -> Option<f64> {
    if !a.is_valid() || !b.is_valid() {
        return None;
    }
    Some(Haversine.distance(a.to_point(), b.to_point()))
}

/// Returns true iff `point` lies within the site's circular geofence.
///
/// The boundary is inclusive: a point exactly `radius_m` from the center is
/// inside.
pub fn within_radius(point: Coordinate, site: &Site) -> bool {
    let radius = site.radius_m();
    if !radius.is_finite() {
        return false;
    }
    distance_m(point, site.center()).is_some_and(|distance| distance <= radius)
}
