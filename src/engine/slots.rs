use chrono::{NaiveDate, NaiveTime, Timelike};
use ulid::Ulid;

use crate::model::*;

// ── Slot generation ──────────────────────────────────────────────
//
// Pure functions: (date, rules, duration, granularity) → candidate start
// times. Conflict checks live in `conflict`; this layer only knows about
// working hours.

fn minutes_of(t: NaiveTime) -> Minutes {
    Minutes::from(t.num_seconds_from_midnight() / 60)
}

fn time_from_minutes(m: Minutes) -> Option<NaiveTime> {
    u32::try_from(m * 60)
        .ok()
        .and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, 0))
}

/// Rules that open `date` for a service of `kind` with staff `staff_id`:
/// weekday, validity range, active flag, capability flag, staff coverage.
pub fn matching_rules<'a>(
    rules: impl IntoIterator<Item = &'a WeeklyRule>,
    date: NaiveDate,
    staff_id: Ulid,
    kind: ServiceKind,
) -> impl Iterator<Item = &'a WeeklyRule> {
    rules
        .into_iter()
        .filter(move |r| r.applies_on(date) && r.allows(kind) && r.covers_staff(staff_id))
}

/// Candidate start times within one rule's window: walk rule start → rule
/// end in granularity steps, emitting starts whose full duration still fits
/// (`start + duration ≤ rule.end`). Lazy, finite, restartable.
pub fn candidate_starts(
    rule: &WeeklyRule,
    duration_min: Minutes,
    granularity_min: Minutes,
) -> impl Iterator<Item = NaiveTime> {
    let open = minutes_of(rule.start);
    let close = minutes_of(rule.end);
    let step = granularity_min.max(1);
    std::iter::successors(Some(open), move |m| Some(m + step))
        .take_while(move |m| m + duration_min <= close)
        .filter_map(time_from_minutes)
}
