//! Pause intervals and their merge/accounting algorithm.
//!
//! A shift records pauses in insertion order. Out-of-order or overlapping
//! closed pauses are tolerated: every duration is computed over the
//! normalized (merged) set, so no paused instant is ever counted twice.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// How a pause ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseEnd {
    /// The worker has not resumed yet.
    Open,
    /// The pause was closed at the given instant.
    Closed(DateTime<Utc>),
}

/// A pause interval with a required start and an optional end.
///
/// A closed pause never ends before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPause", into = "RawPause")]
pub struct Pause {
    start: DateTime<Utc>,
    end: PauseEnd,
}

impl Pause {
    /// Creates a pause that is still running.
    pub const fn open(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: PauseEnd::Open,
        }
    }

    /// Creates a closed pause, rejecting `end < start`.
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::PauseEndsBeforeStart {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self {
            start,
            end: PauseEnd::Closed(end),
        })
    }

    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub const fn end(&self) -> Option<DateTime<Utc>> {
        match self.end {
            PauseEnd::Open => None,
            PauseEnd::Closed(end) => Some(end),
        }
    }

    pub const fn end_state(&self) -> PauseEnd {
        self.end
    }

    pub const fn is_open(&self) -> bool {
        matches!(self.end, PauseEnd::Open)
    }

    /// Closes the pause at `at`. Never moves the end before the start.
    pub(crate) fn close(&mut self, at: DateTime<Utc>) {
        self.end = PauseEnd::Closed(at.max(self.start));
    }

    /// Time spent in this pause up to `as_of`, clamped to zero.
    pub fn span_until(&self, as_of: DateTime<Utc>) -> Duration {
        let until = self.end().map_or(as_of, |end| end.min(as_of));
        (until - self.start).max(Duration::zero())
    }
}

/// Wire form of a pause: `{"start": ..., "end": ...}` with `end` omitted while open.
#[derive(Serialize, Deserialize)]
struct RawPause {
    start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
}

impl TryFrom<RawPause> for Pause {
    type Error = ValidationError;

    fn try_from(raw: RawPause) -> Result<Self, Self::Error> {
        match raw.end {
            Some(end) => Self::closed(raw.start, end),
            None => Ok(Self::open(raw.start)),
        }
    }
}

impl From<Pause> for RawPause {
    fn from(pause: Pause) -> Self {
        Self {
            start: pause.start,
            end: pause.end(),
        }
    }
}

/// Merges pauses into a minimal set, sorted by start.
///
/// A pause is folded into the previous merged pause when it starts at or
/// before that pause's end; an open pause extends to infinity and absorbs
/// everything after it. No two output entries overlap or touch.
/// Zero-length pauses are kept unless they merge into a neighbour.
pub fn normalize(pauses: &[Pause]) -> Vec<Pause> {
    let mut sorted = pauses.to_vec();
    sorted.sort_by_key(Pause::start);

    let mut merged: Vec<Pause> = Vec::with_capacity(sorted.len());
    for pause in sorted {
        if let Some(last) = merged.last_mut() {
            match last.end {
                PauseEnd::Open => continue,
                PauseEnd::Closed(last_end) if pause.start <= last_end => {
                    last.end = match pause.end {
                        PauseEnd::Open => PauseEnd::Open,
                        PauseEnd::Closed(end) => PauseEnd::Closed(last_end.max(end)),
                    };
                    continue;
                }
                PauseEnd::Closed(_) => {}
            }
        }
        merged.push(pause);
    }
    merged
}

/// Total paused time as of `as_of`.
///
/// Each merged pause contributes `min(end, as_of) - start` (an open pause
/// runs until `as_of`), clamped to zero.
pub fn total_paused(pauses: &[Pause], as_of: DateTime<Utc>) -> Duration {
    normalize(pauses)
        .iter()
        .fold(Duration::zero(), |total, pause| {
            total + pause.span_until(as_of)
        })
}
