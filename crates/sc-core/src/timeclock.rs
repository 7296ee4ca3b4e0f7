//! Store-backed shift transitions.
//!
//! [`Timeclock`] is the caller side of the shift machine: it loads the
//! shift, runs the transition with the caller's `now`, and persists exactly
//! the mutation the transition reported. Duplicate requests perform no
//! writes. Callers must still serialize concurrent requests for the same
//! shift; the timeclock holds no locks of its own.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::shift::{Change, Effect, InvalidReason, Shift, Transition, TransitionError};
use crate::store::{PauseMark, ShiftStore};
use crate::types::{ShiftId, SiteId, UserId};

/// Errors from store-backed transitions.
#[derive(Debug, Error)]
pub enum TimeclockError<E>
where
    E: std::error::Error + 'static,
{
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("store error: {0}")]
    Store(#[source] E),
}

impl<E> TimeclockError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns the transition error, if this is one.
    pub const fn transition(&self) -> Option<&TransitionError> {
        match self {
            Self::Transition(err) => Some(err),
            Self::Store(_) => None,
        }
    }
}

/// Applies shift transitions against a [`ShiftStore`].
#[derive(Debug)]
pub struct Timeclock<S> {
    store: S,
}

impl<S: ShiftStore> Timeclock<S> {
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Starts a shift for `user_id` at an active site.
    pub fn start(
        &mut self,
        id: ShiftId,
        user_id: &UserId,
        site_id: &SiteId,
        now: DateTime<Utc>,
    ) -> Result<Shift, TimeclockError<S::Error>> {
        let site = self
            .store
            .site(site_id)
            .map_err(TimeclockError::Store)?
            .filter(crate::site::Site::is_active)
            .ok_or_else(|| {
                TransitionError::invalid(
                    Transition::Start,
                    id.clone(),
                    InvalidReason::SiteUnavailable,
                )
            })?;
        let current = self
            .store
            .active_shift(user_id)
            .map_err(TimeclockError::Store)?;

        let shift = Shift::start(current.as_ref(), id, user_id.clone(), &site, now)?;
        self.store
            .create_shift(&shift)
            .map_err(TimeclockError::Store)?;
        tracing::info!(
            shift_id = %shift.id(),
            user_id = %user_id,
            site_id = %site_id,
            %now,
            "shift started"
        );
        Ok(shift)
    }

    pub fn pause(
        &mut self,
        shift_id: &ShiftId,
        now: DateTime<Utc>,
    ) -> Result<Shift, TimeclockError<S::Error>> {
        self.apply(shift_id, Transition::Pause, now, Shift::pause)
    }

    pub fn resume(
        &mut self,
        shift_id: &ShiftId,
        now: DateTime<Utc>,
    ) -> Result<Shift, TimeclockError<S::Error>> {
        self.apply(shift_id, Transition::Resume, now, Shift::resume)
    }

    /// Ends the shift. Ending an ended shift returns it as stored.
    pub fn end(
        &mut self,
        shift_id: &ShiftId,
        now: DateTime<Utc>,
    ) -> Result<Shift, TimeclockError<S::Error>> {
        self.apply(shift_id, Transition::End, now, Shift::end)
    }

    fn apply(
        &mut self,
        shift_id: &ShiftId,
        transition: Transition,
        now: DateTime<Utc>,
        step: fn(&mut Shift, DateTime<Utc>) -> Result<Effect, TransitionError>,
    ) -> Result<Shift, TimeclockError<S::Error>> {
        let mut shift = self
            .store
            .shift(shift_id)
            .map_err(TimeclockError::Store)?
            .ok_or_else(|| {
                TransitionError::invalid(transition, shift_id.clone(), InvalidReason::UnknownShift)
            })?;

        match step(&mut shift, now)? {
            Effect::Applied(change) => {
                self.persist(shift_id, change)
                    .map_err(TimeclockError::Store)?;
                tracing::info!(%shift_id, %transition, %now, "shift transition applied");
            }
            Effect::Unchanged => {
                tracing::debug!(%shift_id, %transition, "duplicate transition ignored");
            }
        }
        Ok(shift)
    }

    fn persist(&mut self, shift_id: &ShiftId, change: Change) -> Result<(), S::Error> {
        match change {
            Change::PauseOpened { at } => self.store.record_pause(shift_id, PauseMark::Started(at)),
            Change::PauseClosed { at } => self.store.record_pause(shift_id, PauseMark::Ended(at)),
            Change::Ended { at, .. } => self.store.finalize_shift(shift_id, at),
        }
    }
}
