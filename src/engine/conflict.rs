use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::error::{EngineError, SlotConflict};
use super::state::SalonState;

// ── Conflict validation ──────────────────────────────────────────
//
// Three independent checks, all of which must pass: staff time, blackout
// exceptions, resource capacity. Interval overlap is half-open; two
// intervals sharing only an endpoint do not conflict.

/// Validate one candidate slot against current state. `exclude` skips an
/// appointment's own occupancy when it is being moved.
pub fn check_slot(
    state: &SalonState,
    staff_id: Ulid,
    span: &Span,
    items: &[LineItem],
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    check_staff_time(state, staff_id, span, exclude)?;
    check_blackouts(state, staff_id, span)?;
    check_resources(state, span, items, exclude)?;
    Ok(())
}

fn check_staff_time(
    state: &SalonState,
    staff_id: Ulid,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    for appt in occupying_overlaps(state, span, exclude) {
        if appt.staff_id == staff_id {
            return Err(EngineError::SlotUnavailable(SlotConflict::StaffBusy(appt.id)));
        }
    }
    Ok(())
}

fn check_blackouts(state: &SalonState, staff_id: Ulid, span: &Span) -> Result<(), EngineError> {
    for blackout in state.blackouts.values() {
        if blackout.covers_staff(staff_id) && blackout.effective_span().overlaps(span) {
            return Err(EngineError::SlotUnavailable(SlotConflict::Blackout(blackout.id)));
        }
    }
    Ok(())
}

/// Resource capacity. For every required resource type across the booking's
/// services, operational units must cover what overlapping occupying
/// appointments already hold plus what this booking takes. An overlapping
/// appointment with no declared need for a type still holds one unit of it.
fn check_resources(
    state: &SalonState,
    span: &Span,
    items: &[LineItem],
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    // type_id → (any required, units this booking takes)
    let mut wanted: HashMap<Ulid, (bool, u32)> = HashMap::new();
    for item in items {
        for need in state.needs_of(item.service_id) {
            let slot = wanted.entry(need.type_id).or_insert((false, 0));
            slot.0 |= need.required;
            slot.1 += need.units.max(1);
        }
    }
    if wanted.is_empty() {
        // No declared needs: unconstrained by physical resources.
        return Ok(());
    }

    let competitors: Vec<&Appointment> = occupying_overlaps(state, span, exclude).collect();

    for (&type_id, &(required, take)) in &wanted {
        if !required {
            continue;
        }
        let operational = state.operational_units(type_id);
        let committed: u32 = competitors
            .iter()
            .map(|appt| committed_units(state, appt, type_id))
            .sum();
        if committed + take > operational {
            return Err(EngineError::SlotUnavailable(SlotConflict::ResourcesSaturated {
                type_id,
                operational,
            }));
        }
    }
    Ok(())
}

/// Units of `type_id` one occupying appointment holds: its services'
/// declared counts, or the default of one when nothing is declared.
fn committed_units(state: &SalonState, appt: &Appointment, type_id: Ulid) -> u32 {
    let declared: u32 = appt
        .service_ids()
        .flat_map(|sid| state.needs_of(sid))
        .filter(|need| need.type_id == type_id)
        .map(|need| need.units.max(1))
        .sum();
    declared.max(1)
}

fn occupying_overlaps<'a>(
    state: &'a SalonState,
    span: &'a Span,
    exclude: Option<Ulid>,
) -> impl Iterator<Item = &'a Appointment> {
    // An appointment can only overlap the span if it sits on one of the
    // span's calendar dates.
    let first = span.start.date();
    let last = span.end.date();
    state
        .by_day
        .range(first..=last)
        .flat_map(|(_, ids)| ids.iter())
        .filter_map(move |id| state.appointments.get(id))
        .filter(move |a| {
            a.state.occupies() && exclude != Some(a.id) && a.span().overlaps(span)
        })
}
