//! Due-check and repeat arithmetic.
//!
//! Pure functions over naive local timestamps; the registry decides what
//! to do with the answers. The due heuristic is tolerant of poll
//! granularity: an item fires when its time falls inside a trailing
//! tolerance window before `now`, or when it names the current minute.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};

use crate::reminders::model::Repeat;

/// Where an item sits relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    /// Not yet due.
    Upcoming,
    /// Fire it.
    Due,
    /// Missed by more than the grace period; roll forward, do not fire.
    Stale,
}

/// Classify a fire time against `now`.
pub fn classify(
    fire_at: NaiveDateTime,
    now: NaiveDateTime,
    tolerance: Duration,
    grace: Duration,
) -> DueState {
    let delta = fire_at - now;
    if delta < -grace {
        return DueState::Stale;
    }
    let in_window = delta <= Duration::zero() && delta >= -tolerance;
    let same_minute = fire_at.date() == now.date()
        && fire_at.hour() == now.hour()
        && fire_at.minute() == now.minute();
    if in_window || same_minute {
        DueState::Due
    } else {
        DueState::Upcoming
    }
}

/// One repeat step. Monthly moves to the same day of the next month,
/// clamped to day 28 so short months never produce an invalid date.
pub fn advance(fire_at: NaiveDateTime, repeat: Repeat) -> NaiveDateTime {
    match repeat {
        Repeat::None => fire_at,
        Repeat::Daily => fire_at + Duration::days(1),
        Repeat::Weekly => fire_at + Duration::days(7),
        Repeat::Monthly => {
            let first_of_month = fire_at.with_day(1).unwrap_or(fire_at);
            let in_next_month = first_of_month + Duration::days(32);
            let day = fire_at.day().min(28);
            in_next_month.with_day(day).unwrap_or(in_next_month)
        }
    }
}

/// Advance `fire_at` until it lands safely past `now` (strictly more than
/// `buffer` ahead), bounded by `max_steps` against pathological clock skew.
///
/// Used both when rescheduling after a fire and when rolling a missed
/// repeating item forward without firing.
pub fn catch_up(
    mut fire_at: NaiveDateTime,
    repeat: Repeat,
    now: NaiveDateTime,
    buffer: Duration,
    max_steps: u32,
) -> NaiveDateTime {
    if !repeat.is_repeating() {
        return fire_at;
    }
    for _ in 0..max_steps {
        if fire_at - now > buffer {
            return fire_at;
        }
        fire_at = advance(fire_at, repeat);
    }
    tracing::warn!(last = %fire_at, "Catch-up hit the iteration cap");
    fire_at
}
