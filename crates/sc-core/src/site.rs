//! Work sites and their geofences.

use serde::Serialize;

use crate::geofence::Coordinate;
use crate::types::{SiteId, TenantId, ValidationError};

/// A geofenced work site owned by a tenant.
///
/// Sites are read-only from the core's perspective; the directory that
/// stores them owns creation and activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Site {
    id: SiteId,
    tenant_id: TenantId,
    name: String,
    center: Coordinate,
    radius_m: f64,
    active: bool,
}

impl Site {
    /// Creates an active site after validating its geofence.
    pub fn new(
        id: SiteId,
        tenant_id: TenantId,
        name: impl Into<String>,
        center: Coordinate,
        radius_m: f64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ValidationError::Empty { field: "site name" });
        }
        if !center.is_valid() {
            return Err(ValidationError::InvalidCoordinate {
                latitude: center.latitude,
                longitude: center.longitude,
            });
        }
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(ValidationError::InvalidRadius { value: radius_m });
        }
        Ok(Self {
            id,
            tenant_id,
            name,
            center,
            radius_m,
            active: true,
        })
    }

    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub const fn id(&self) -> &SiteId {
        &self.id
    }

    pub const fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn center(&self) -> Coordinate {
        self.center
    }

    pub const fn radius_m(&self) -> f64 {
        self.radius_m
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }
}
