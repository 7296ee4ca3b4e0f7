//! Shift lifecycle state machine.
//!
//! A shift moves `Active <-> Paused` any number of times and then to the
//! terminal `Ended` state. Every transition takes the current instant as an
//! explicit argument and rejects instants earlier than anything already
//! recorded on the shift, so durations can never go negative.
//!
//! Duplicate requests are tolerated rather than rejected: pausing a paused
//! shift, resuming a running one, or ending an ended one returns
//! [`Effect::Unchanged`]. A retried request therefore converges to the
//! state produced by the first one.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pause::{self, Pause};
use crate::site::Site;
use crate::types::{ShiftId, SiteId, UserId, ValidationError};

/// The four lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    End,
}

impl Transition {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::End => "end",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a transition is structurally forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The user already has an unfinished shift.
    AlreadyActive,
    /// The shift has ended and can no longer change.
    AlreadyEnded,
    /// No shift with the given ID exists.
    UnknownShift,
    /// The site is unknown or no longer active.
    SiteUnavailable,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AlreadyActive => "an unfinished shift already exists",
            Self::AlreadyEnded => "the shift has already ended",
            Self::UnknownShift => "no such shift",
            Self::SiteUnavailable => "the site is unknown or inactive",
        };
        write!(f, "{s}")
    }
}

/// Errors raised by shift transitions.
///
/// Both conditions are recoverable: the caller either surfaces them or
/// retries with a re-sampled clock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The shift's state forbids the transition.
    #[error("cannot {transition} shift {shift_id}: {reason}")]
    InvalidTransition {
        transition: Transition,
        shift_id: ShiftId,
        reason: InvalidReason,
    },

    /// The supplied instant precedes a timestamp already recorded on the shift.
    #[error("cannot {transition} at {now}: shift already has a timestamp at {latest}")]
    ClockRegression {
        transition: Transition,
        now: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

impl TransitionError {
    pub(crate) const fn invalid(
        transition: Transition,
        shift_id: ShiftId,
        reason: InvalidReason,
    ) -> Self {
        Self::InvalidTransition {
            transition,
            shift_id,
            reason,
        }
    }
}

/// The mutation a transition performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// A new open pause was appended.
    PauseOpened { at: DateTime<Utc> },
    /// The open pause was closed.
    PauseClosed { at: DateTime<Utc> },
    /// The shift ended, closing the open pause at the same instant if there was one.
    Ended {
        at: DateTime<Utc>,
        closed_pause: bool,
    },
}

/// Outcome of a successful transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Applied(Change),
    /// The request was a duplicate; nothing changed.
    Unchanged,
}

impl Effect {
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Coarse lifecycle state of a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftState {
    Active,
    Paused,
    Ended,
}

impl ShiftState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for ShiftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A worker's shift at a site.
///
/// Fields are only reachable through accessors; the transitions below are
/// the sole mutation path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawShift")]
pub struct Shift {
    id: ShiftId,
    user_id: UserId,
    site_id: SiteId,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ended_at: Option<DateTime<Utc>>,
    pauses: Vec<Pause>,
}

impl Shift {
    /// Starts a new shift at `site`.
    ///
    /// `current` is an existing shift reference the caller holds for the
    /// user, normally the store's unfinished shift. Any reference is an
    /// invalid transition: `AlreadyEnded` if it has ended, `AlreadyActive`
    /// otherwise.
    pub fn start(
        current: Option<&Self>,
        id: ShiftId,
        user_id: UserId,
        site: &Site,
        now: DateTime<Utc>,
    ) -> Result<Self, TransitionError> {
        if let Some(existing) = current {
            let reason = if existing.is_active() {
                InvalidReason::AlreadyActive
            } else {
                InvalidReason::AlreadyEnded
            };
            return Err(TransitionError::invalid(
                Transition::Start,
                existing.id.clone(),
                reason,
            ));
        }
        Ok(Self {
            id,
            user_id,
            site_id: site.id().clone(),
            started_at: now,
            ended_at: None,
            pauses: Vec::new(),
        })
    }

    /// Rebuilds a persisted shift, re-checking every lifecycle invariant.
    pub fn restore(
        id: ShiftId,
        user_id: UserId,
        site_id: SiteId,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        pauses: Vec<Pause>,
    ) -> Result<Self, ValidationError> {
        let inconsistent = |reason| ValidationError::InconsistentShift {
            shift_id: id.to_string(),
            reason,
        };

        if ended_at.is_some_and(|end| end < started_at) {
            return Err(inconsistent("shift ends before it starts"));
        }
        if pauses.iter().any(|p| p.start() < started_at) {
            return Err(inconsistent("pause starts before the shift"));
        }
        let open_count = pauses.iter().filter(|p| p.is_open()).count();
        if open_count > 1 {
            return Err(inconsistent("more than one open pause"));
        }
        if open_count == 1 && pauses.last().is_some_and(|p| !p.is_open()) {
            return Err(inconsistent("open pause is not the most recent"));
        }
        if let Some(end) = ended_at {
            if open_count > 0 {
                return Err(inconsistent("ended shift has an open pause"));
            }
            if pauses.iter().filter_map(Pause::end).any(|e| e > end) {
                return Err(inconsistent("pause ends after the shift"));
            }
        }

        Ok(Self {
            id,
            user_id,
            site_id,
            started_at,
            ended_at,
            pauses,
        })
    }

    /// Opens a pause at `now`. Pausing an already paused shift is a no-op.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<Effect, TransitionError> {
        self.ensure_not_ended(Transition::Pause)?;
        self.ensure_monotonic(Transition::Pause, now)?;
        if self.is_paused() {
            tracing::debug!(shift_id = %self.id, "pause ignored: already paused");
            return Ok(Effect::Unchanged);
        }
        self.pauses.push(Pause::open(now));
        Ok(Effect::Applied(Change::PauseOpened { at: now }))
    }

    /// Closes the open pause at `now`. Resuming a running shift is a no-op.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<Effect, TransitionError> {
        self.ensure_not_ended(Transition::Resume)?;
        self.ensure_monotonic(Transition::Resume, now)?;
        let Some(open) = self.pauses.last_mut().filter(|p| p.is_open()) else {
            tracing::debug!(shift_id = %self.id, "resume ignored: not paused");
            return Ok(Effect::Unchanged);
        };
        open.close(now);
        Ok(Effect::Applied(Change::PauseClosed { at: now }))
    }

    /// Ends the shift at `now`, closing an open pause at the same instant.
    ///
    /// Ending an ended shift returns it untouched and ignores `now`.
    pub fn end(&mut self, now: DateTime<Utc>) -> Result<Effect, TransitionError> {
        if let Some(ended_at) = self.ended_at {
            tracing::debug!(shift_id = %self.id, %ended_at, "end ignored: already ended");
            return Ok(Effect::Unchanged);
        }
        self.ensure_monotonic(Transition::End, now)?;
        let closed_pause = match self.pauses.last_mut() {
            Some(open) if open.is_open() => {
                open.close(now);
                true
            }
            _ => false,
        };
        self.ended_at = Some(now);
        Ok(Effect::Applied(Change::Ended {
            at: now,
            closed_pause,
        }))
    }

    fn ensure_not_ended(&self, transition: Transition) -> Result<(), TransitionError> {
        if self.ended_at.is_some() {
            return Err(TransitionError::invalid(
                transition,
                self.id.clone(),
                InvalidReason::AlreadyEnded,
            ));
        }
        Ok(())
    }

    fn ensure_monotonic(
        &self,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let latest = self.latest_instant();
        if now < latest {
            return Err(TransitionError::ClockRegression {
                transition,
                now,
                latest,
            });
        }
        Ok(())
    }

    /// The most recent timestamp recorded anywhere on the shift.
    pub fn latest_instant(&self) -> DateTime<Utc> {
        self.pauses
            .iter()
            .flat_map(|p| [Some(p.start()), p.end()])
            .flatten()
            .chain(self.ended_at)
            .fold(self.started_at, DateTime::max)
    }

    pub const fn id(&self) -> &ShiftId {
        &self.id
    }

    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub const fn site_id(&self) -> &SiteId {
        &self.site_id
    }

    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Pauses in insertion order.
    pub fn pauses(&self) -> &[Pause] {
        &self.pauses
    }

    /// True while the shift has not ended (running or paused).
    pub const fn is_active(&self) -> bool {
        self.ended_at.is_none()
    }

    /// True if the most recent pause is open and the shift has not ended.
    pub fn is_paused(&self) -> bool {
        self.is_active() && self.pauses.last().is_some_and(Pause::is_open)
    }

    pub fn state(&self) -> ShiftState {
        if !self.is_active() {
            ShiftState::Ended
        } else if self.is_paused() {
            ShiftState::Paused
        } else {
            ShiftState::Active
        }
    }

    /// Wall-clock span from start to the end (or `as_of` while active).
    pub fn elapsed(&self, as_of: DateTime<Utc>) -> Duration {
        (self.ended_at.unwrap_or(as_of) - self.started_at).max(Duration::zero())
    }

    /// Paused time, measured up to the end for ended shifts and `as_of` otherwise.
    pub fn paused_duration(&self, as_of: DateTime<Utc>) -> Duration {
        pause::total_paused(&self.pauses, self.ended_at.unwrap_or(as_of))
    }

    /// Worked time: elapsed minus paused, clamped to zero.
    pub fn worked_duration(&self, as_of: DateTime<Utc>) -> Duration {
        (self.elapsed(as_of) - self.paused_duration(as_of)).max(Duration::zero())
    }
}

#[derive(Deserialize)]
struct RawShift {
    id: ShiftId,
    user_id: UserId,
    site_id: SiteId,
    started_at: DateTime<Utc>,
    #[serde(default)]
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pauses: Vec<Pause>,
}

impl TryFrom<RawShift> for Shift {
    type Error = ValidationError;

    fn try_from(raw: RawShift) -> Result<Self, Self::Error> {
        Self::restore(
            raw.id,
            raw.user_id,
            raw.site_id,
            raw.started_at,
            raw.ended_at,
            raw.pauses,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Coordinate;
    use crate::types::TenantId;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).expect("valid test timestamp")
    }

    fn ms(value: i64) -> Duration {
        Duration::milliseconds(value)
    }

    fn site() -> Site {
        Site::new(
            SiteId::new("site1").unwrap(),
            TenantId::new("t1").unwrap(),
            "Site A",
            Coordinate::new(45.40797, 11.88586),
            50.0,
        )
        .unwrap()
    }

    fn start_at(now: i64) -> Shift {
        Shift::start(
            None,
            ShiftId::new("shift-1").unwrap(),
            UserId::new("worker").unwrap(),
            &site(),
            at(now),
        )
        .unwrap()
    }

    #[test]
    fn start_creates_active_shift() {
        let shift = start_at(0);
        assert_eq!(shift.state(), ShiftState::Active);
        assert_eq!(shift.started_at(), at(0));
        assert_eq!(shift.ended_at(), None);
        assert!(shift.pauses().is_empty());
        assert_eq!(shift.site_id().as_str(), "site1");
    }

    #[test]
    fn start_rejects_existing_unfinished_shift() {
        let existing = start_at(0);
        let err = Shift::start(
            Some(&existing),
            ShiftId::new("shift-2").unwrap(),
            UserId::new("worker").unwrap(),
            &site(),
            at(10),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                transition: Transition::Start,
                shift_id: ShiftId::new("shift-1").unwrap(),
                reason: InvalidReason::AlreadyActive,
            }
        );
    }

    #[test]
    fn start_on_ended_shift_reference_is_rejected() {
        let mut previous = start_at(0);
        previous.end(at(100)).unwrap();
        let next = Shift::start(
            Some(&previous),
            ShiftId::new("shift-2").unwrap(),
            UserId::new("worker").unwrap(),
            &site(),
            at(50),
        );
        assert_eq!(
            next.unwrap_err(),
            TransitionError::InvalidTransition {
                transition: Transition::Start,
                shift_id: previous.id().clone(),
                reason: InvalidReason::AlreadyEnded,
            }
        );
    }

    #[test]
    fn start_without_reference_after_previous_shift_ended() {
        let mut previous = start_at(0);
        previous.end(at(100)).unwrap();
        let next = Shift::start(
            None,
            ShiftId::new("shift-2").unwrap(),
            UserId::new("worker").unwrap(),
            &site(),
            at(200),
        )
        .unwrap();
        assert_eq!(next.started_at(), at(200));
        assert!(next.is_active());
    }

    #[test]
    fn pause_resume_end_scenario() {
        let mut shift = start_at(0);
        assert_eq!(
            shift.pause(at(600_000)).unwrap(),
            Effect::Applied(Change::PauseOpened { at: at(600_000) })
        );
        assert_eq!(shift.state(), ShiftState::Paused);
        assert_eq!(
            shift.resume(at(900_000)).unwrap(),
            Effect::Applied(Change::PauseClosed { at: at(900_000) })
        );
        assert_eq!(
            shift.end(at(1_800_000)).unwrap(),
            Effect::Applied(Change::Ended {
                at: at(1_800_000),
                closed_pause: false,
            })
        );

        assert_eq!(shift.paused_duration(at(5_000_000)), ms(300_000));
        assert_eq!(shift.worked_duration(at(5_000_000)), ms(1_500_000));
    }

    #[test]
    fn end_closes_open_pause_at_same_instant() {
        let mut shift = start_at(0);
        shift.pause(at(400)).unwrap();
        let effect = shift.end(at(1_000)).unwrap();

        assert_eq!(
            effect,
            Effect::Applied(Change::Ended {
                at: at(1_000),
                closed_pause: true,
            })
        );
        assert_eq!(shift.pauses(), &[Pause::closed(at(400), at(1_000)).unwrap()]);
        assert_eq!(shift.paused_duration(at(99_999)), ms(600));
        assert_eq!(shift.worked_duration(at(99_999)), ms(400));
        assert!(!shift.is_paused());
    }

    #[test]
    fn second_end_is_ignored() {
        let mut shift = start_at(0);
        shift.end(at(1_000)).unwrap();
        let first = shift.clone();

        assert_eq!(shift.end(at(5_000)).unwrap(), Effect::Unchanged);
        assert_eq!(shift, first);
        assert_eq!(shift.ended_at(), Some(at(1_000)));

        // An earlier instant is ignored as well, not reported as a regression.
        assert_eq!(shift.end(at(500)).unwrap(), Effect::Unchanged);
        assert_eq!(shift, first);
    }

    #[test]
    fn double_pause_is_idempotent() {
        let mut once = start_at(0);
        once.pause(at(100)).unwrap();

        let mut twice = once.clone();
        assert_eq!(twice.pause(at(200)).unwrap(), Effect::Unchanged);
        assert_eq!(twice, once);
        assert_eq!(twice.pauses().len(), 1);
    }

    #[test]
    fn double_resume_is_idempotent() {
        let mut once = start_at(0);
        once.pause(at(100)).unwrap();
        once.resume(at(200)).unwrap();

        let mut twice = once.clone();
        assert_eq!(twice.resume(at(300)).unwrap(), Effect::Unchanged);
        assert_eq!(twice, once);
    }

    #[test]
    fn resume_without_pause_is_noop() {
        let mut shift = start_at(0);
        assert_eq!(shift.resume(at(10)).unwrap(), Effect::Unchanged);
        assert!(shift.pauses().is_empty());
    }

    #[test]
    fn pause_and_resume_rejected_after_end() {
        let mut shift = start_at(0);
        shift.end(at(100)).unwrap();

        for (transition, result) in [
            (Transition::Pause, shift.clone().pause(at(200))),
            (Transition::Resume, shift.clone().resume(at(200))),
        ] {
            assert_eq!(
                result.unwrap_err(),
                TransitionError::InvalidTransition {
                    transition,
                    shift_id: ShiftId::new("shift-1").unwrap(),
                    reason: InvalidReason::AlreadyEnded,
                }
            );
        }
    }

    #[test]
    fn clock_regression_is_rejected() {
        let mut shift = start_at(1_000);
        let err = shift.pause(at(500)).unwrap_err();
        assert_eq!(
            err,
            TransitionError::ClockRegression {
                transition: Transition::Pause,
                now: at(500),
                latest: at(1_000),
            }
        );

        shift.pause(at(2_000)).unwrap();
        assert!(matches!(
            shift.resume(at(1_500)),
            Err(TransitionError::ClockRegression { .. })
        ));
        assert!(matches!(
            shift.end(at(1_999)),
            Err(TransitionError::ClockRegression { .. })
        ));
        // Nothing was mutated by the rejected calls.
        assert!(shift.is_paused());
        assert_eq!(shift.latest_instant(), at(2_000));
    }

    #[test]
    fn equal_instant_is_not_a_regression() {
        let mut shift = start_at(1_000);
        shift.pause(at(1_000)).unwrap();
        shift.resume(at(1_000)).unwrap();
        shift.end(at(1_000)).unwrap();
        assert_eq!(shift.paused_duration(at(1_000)), Duration::zero());
        assert_eq!(shift.worked_duration(at(1_000)), Duration::zero());
        assert_eq!(shift.pauses().len(), 1);
    }

    #[test]
    fn live_durations_track_as_of() {
        let mut shift = start_at(0);
        shift.pause(at(1_000)).unwrap();

        assert_eq!(shift.paused_duration(at(1_500)), ms(500));
        assert_eq!(shift.worked_duration(at(1_500)), ms(1_000));
        assert_eq!(shift.paused_duration(at(4_000)), ms(3_000));
        assert_eq!(shift.worked_duration(at(4_000)), ms(1_000));
    }

    /// Drives a shift through a fixed script of transitions, checking
    /// invariants after every step.
    #[test]
    fn invariants_hold_across_transition_sequences() {
        let scripts: [&[Transition]; 5] = [
            &[Transition::Pause, Transition::Resume, Transition::End],
            &[Transition::Pause, Transition::Pause, Transition::End],
            &[Transition::Resume, Transition::Pause, Transition::Resume, Transition::Pause],
            &[Transition::End, Transition::End],
            &[
                Transition::Pause,
                Transition::Resume,
                Transition::Resume,
                Transition::Pause,
                Transition::Resume,
                Transition::Pause,
                Transition::End,
            ],
        ];

        for script in scripts {
            let mut shift = start_at(0);
            for (step, transition) in script.iter().enumerate() {
                let now = at(i64::try_from(step + 1).unwrap() * 1_000);
                match transition {
                    Transition::Pause => shift.pause(now).map(|_| ()),
                    Transition::Resume => shift.resume(now).map(|_| ()),
                    Transition::End => shift.end(now).map(|_| ()),
                    Transition::Start => unreachable!("scripts never restart"),
                }
                .unwrap();

                let open: Vec<_> = shift
                    .pauses()
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.is_open())
                    .collect();
                assert!(open.len() <= 1, "multiple open pauses in {script:?}");
                if let Some((index, _)) = open.first() {
                    assert_eq!(*index, shift.pauses().len() - 1);
                    assert!(shift.ended_at().is_none());
                }

                for as_of in [0, 500, 1_000, 2_500, 7_000, 20_000] {
                    let as_of = at(as_of);
                    assert_eq!(
                        shift.worked_duration(as_of) + shift.paused_duration(as_of),
                        shift.ended_at().unwrap_or(as_of) - shift.started_at(),
                        "duration identity broken in {script:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn restore_rejects_broken_invariants() {
        let restore = |ended_at: Option<i64>, pauses: Vec<Pause>| {
            Shift::restore(
                ShiftId::new("shift-1").unwrap(),
                UserId::new("worker").unwrap(),
                SiteId::new("site1").unwrap(),
                at(1_000),
                ended_at.map(at),
                pauses,
            )
        };

        assert!(restore(None, vec![Pause::closed(at(1_100), at(1_200)).unwrap()]).is_ok());
        assert!(restore(Some(900), vec![]).is_err());
        assert!(restore(None, vec![Pause::open(at(500))]).is_err());
        assert!(restore(None, vec![Pause::open(at(1_100)), Pause::open(at(1_200))]).is_err());
        assert!(
            restore(
                None,
                vec![Pause::open(at(1_100)), Pause::closed(at(1_200), at(1_300)).unwrap()]
            )
            .is_err()
        );
        assert!(restore(Some(2_000), vec![Pause::open(at(1_100))]).is_err());
        assert!(restore(Some(2_000), vec![Pause::closed(at(1_100), at(2_100)).unwrap()]).is_err());
    }

    #[test]
    fn serde_roundtrip_revalidates() {
        let mut shift = start_at(0);
        shift.pause(at(1_000)).unwrap();
        let json = serde_json::to_string(&shift).unwrap();
        let parsed: Shift = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, shift);

        let broken = r#"{
            "id": "s", "user_id": "u", "site_id": "x",
            "started_at": "2025-01-15T09:00:00Z",
            "ended_at": "2025-01-15T08:00:00Z",
            "pauses": []
        }"#;
        assert!(serde_json::from_str::<Shift>(broken).is_err());
    }
}
