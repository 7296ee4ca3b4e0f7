//! Core domain logic for site clocking.
//!
//! This crate contains the fundamental types and logic for:
//! - Geofencing: whether a worker stands within a site's radius
//! - Pauses: merging pause intervals and totalling paused time
//! - Shifts: the start/pause/resume/end state machine and its durations
//! - Storage: the capability set a backend must provide, plus an in-memory store

pub mod geofence;
pub mod pause;
pub mod shift;
pub mod site;
pub mod store;
mod timeclock;
pub mod types;

pub use geofence::{Coordinate, distance_m, within_radius};
pub use pause::{Pause, PauseEnd};
pub use shift::{Change, Effect, InvalidReason, Shift, ShiftState, Transition, TransitionError};
pub use site::Site;
pub use store::{MemoryStore, MemoryStoreError, PauseMark, ShiftStore};
pub use timeclock::{Timeclock, TimeclockError};
pub use types::{ShiftId, SiteId, TenantId, UserId, ValidationError};
