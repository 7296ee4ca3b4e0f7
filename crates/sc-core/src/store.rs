//! Site directory and shift store capability set.
//!
//! The core never persists anything itself. Backends implement
//! [`ShiftStore`]; [`MemoryStore`] is the in-process implementation used
//! in tests and demos, and `sc-db` provides the SQLite one.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::shift::{Shift, TransitionError};
use crate::site::Site;
use crate::types::{ShiftId, SiteId, UserId};

/// A pause boundary to record against a stored shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseMark {
    /// Append an open pause starting at the instant.
    Started(DateTime<Utc>),
    /// Close the shift's open pause at the instant.
    Ended(DateTime<Utc>),
}

/// Persistence operations the core relies on.
///
/// Writes are only issued for mutations a transition actually performed,
/// so implementations may treat a write that finds nothing to change as a
/// lost race and report an error.
pub trait ShiftStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists active sites.
    fn list_sites(&self) -> Result<Vec<Site>, Self::Error>;

    /// Looks up a site by ID, active or not.
    fn site(&self, id: &SiteId) -> Result<Option<Site>, Self::Error>;

    /// Persists a newly started shift.
    fn create_shift(&mut self, shift: &Shift) -> Result<(), Self::Error>;

    /// Records the start or end of a pause.
    fn record_pause(&mut self, shift_id: &ShiftId, mark: PauseMark) -> Result<(), Self::Error>;

    /// Sets the shift's end, closing any open pause at the same instant in
    /// the same write.
    fn finalize_shift(
        &mut self,
        shift_id: &ShiftId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), Self::Error>;

    /// Loads a shift by ID.
    fn shift(&self, id: &ShiftId) -> Result<Option<Shift>, Self::Error>;

    /// Returns the user's unfinished shift, if any.
    fn active_shift(&self, user_id: &UserId) -> Result<Option<Shift>, Self::Error>;

    /// Lists the user's shifts ordered by start.
    fn list_shifts(&self, user_id: &UserId) -> Result<Vec<Shift>, Self::Error>;
}

impl<S: ShiftStore + ?Sized> ShiftStore for &mut S {
    type Error = S::Error;

    fn list_sites(&self) -> Result<Vec<Site>, Self::Error> {
        (**self).list_sites()
    }

    fn site(&self, id: &SiteId) -> Result<Option<Site>, Self::Error> {
        (**self).site(id)
    }

    fn create_shift(&mut self, shift: &Shift) -> Result<(), Self::Error> {
        (**self).create_shift(shift)
    }

    fn record_pause(&mut self, shift_id: &ShiftId, mark: PauseMark) -> Result<(), Self::Error> {
        (**self).record_pause(shift_id, mark)
    }

    fn finalize_shift(
        &mut self,
        shift_id: &ShiftId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        (**self).finalize_shift(shift_id, ended_at)
    }

    fn shift(&self, id: &ShiftId) -> Result<Option<Shift>, Self::Error> {
        (**self).shift(id)
    }

    fn active_shift(&self, user_id: &UserId) -> Result<Option<Shift>, Self::Error> {
        (**self).active_shift(user_id)
    }

    fn list_shifts(&self, user_id: &UserId) -> Result<Vec<Shift>, Self::Error> {
        (**self).list_shifts(user_id)
    }
}

/// Errors from the in-memory store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryStoreError {
    #[error("shift not found: {0}")]
    UnknownShift(ShiftId),

    #[error("shift already exists: {0}")]
    DuplicateShift(ShiftId),

    #[error("user {0} already has an unfinished shift")]
    ActiveShiftExists(UserId),

    /// The stored copy refused the write.
    #[error("stale write: {0}")]
    Stale(#[from] TransitionError),

    /// The write found nothing to change.
    #[error("stale write to shift {0}: nothing to change")]
    NothingToChange(ShiftId),
}

/// A naive in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    sites: Vec<Site>,
    shifts: Vec<Shift>,
}

impl MemoryStore {
    /// Creates a store that serves the given sites.
    pub const fn with_sites(sites: Vec<Site>) -> Self {
        Self {
            sites,
            shifts: Vec::new(),
        }
    }

    fn shift_mut(&mut self, id: &ShiftId) -> Result<&mut Shift, MemoryStoreError> {
        self.shifts
            .iter_mut()
            .find(|s| s.id() == id)
            .ok_or_else(|| MemoryStoreError::UnknownShift(id.clone()))
    }
}

impl ShiftStore for MemoryStore {
    type Error = MemoryStoreError;

    fn list_sites(&self) -> Result<Vec<Site>, Self::Error> {
        Ok(self.sites.iter().filter(|s| s.is_active()).cloned().collect())
    }

    fn site(&self, id: &SiteId) -> Result<Option<Site>, Self::Error> {
        Ok(self.sites.iter().find(|s| s.id() == id).cloned())
    }

    fn create_shift(&mut self, shift: &Shift) -> Result<(), Self::Error> {
        if self.shifts.iter().any(|s| s.id() == shift.id()) {
            return Err(MemoryStoreError::DuplicateShift(shift.id().clone()));
        }
        if self
            .shifts
            .iter()
            .any(|s| s.user_id() == shift.user_id() && s.is_active())
        {
            return Err(MemoryStoreError::ActiveShiftExists(shift.user_id().clone()));
        }
        self.shifts.push(shift.clone());
        Ok(())
    }

    fn record_pause(&mut self, shift_id: &ShiftId, mark: PauseMark) -> Result<(), Self::Error> {
        let stored = self.shift_mut(shift_id)?;
        let effect = match mark {
            PauseMark::Started(at) => stored.pause(at)?,
            PauseMark::Ended(at) => stored.resume(at)?,
        };
        if !effect.is_applied() {
            return Err(MemoryStoreError::NothingToChange(shift_id.clone()));
        }
        Ok(())
    }

    fn finalize_shift(
        &mut self,
        shift_id: &ShiftId,
        ended_at: DateTime<Utc>,
    ) -> Result<(), Self::Error> {
        let stored = self.shift_mut(shift_id)?;
        if !stored.end(ended_at)?.is_applied() {
            return Err(MemoryStoreError::NothingToChange(shift_id.clone()));
        }
        Ok(())
    }

    fn shift(&self, id: &ShiftId) -> Result<Option<Shift>, Self::Error> {
        Ok(self.shifts.iter().find(|s| s.id() == id).cloned())
    }

    fn active_shift(&self, user_id: &UserId) -> Result<Option<Shift>, Self::Error> {
        Ok(self
            .shifts
            .iter()
            .filter(|s| s.user_id() == user_id && s.is_active())
            .max_by_key(|s| s.started_at())
            .cloned())
    }

    fn list_shifts(&self, user_id: &UserId) -> Result<Vec<Shift>, Self::Error> {
        let mut shifts: Vec<_> = self
            .shifts
            .iter()
            .filter(|s| s.user_id() == user_id)
            .cloned()
            .collect();
        shifts.sort_by(|a, b| {
            a.started_at()
                .cmp(&b.started_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(shifts)
    }
}
