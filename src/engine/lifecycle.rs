use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Notice;

use super::conflict::check_slot;
use super::error::{EngineError, SlotConflict};
use super::reclaim::{self, FreedSlot};
use super::state::SalonState;
use super::Engine;

/// True when some availability rule opens `[start, start+duration)` on
/// `date` for this staff member and every service kind in the booking.
/// Lifecycle guards fail closed: no rule, no booking.
pub(super) fn slot_within_rules(
    state: &SalonState,
    staff_id: Ulid,
    date: NaiveDate,
    start: NaiveTime,
    duration_min: Minutes,
    kinds: &[ServiceKind],
) -> bool {
    let slot_start = date.and_time(start);
    let slot_end = slot_start + Duration::minutes(duration_min);
    state.rules.values().any(|r| {
        r.applies_on(date)
            && r.covers_staff(staff_id)
            && kinds.iter().all(|k| r.allows(*k))
            && date.and_time(r.start) <= slot_start
            && slot_end <= date.and_time(r.end)
    })
}

/// Distinct service kinds of a booking's line items. Items whose service
/// has since left the catalog impose no capability constraint.
pub(super) fn booking_kinds(state: &SalonState, items: &[LineItem]) -> Vec<ServiceKind> {
    let mut kinds: Vec<ServiceKind> = items
        .iter()
        .filter_map(|i| state.services.get(&i.service_id).map(|s| s.kind))
        .collect();
    kinds.dedup();
    kinds
}

fn cutoff_guard(policy: &Policy, appt: &Appointment, now: NaiveDateTime) -> Result<(), EngineError> {
    let remaining = appt.start_at() - now;
    if remaining < Duration::hours(policy.cutoff_hours) {
        return Err(EngineError::TimeWindowExceeded {
            required_hours: policy.cutoff_hours,
            remaining_hours: remaining.num_hours().max(0),
        });
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::LimitExceeded("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog: staff and services ──────────────────────────────

    pub async fn add_staff(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name)?;
        let mut state = self.state.write().await;
        if state.staff.len() >= MAX_STAFF {
            return Err(EngineError::LimitExceeded("too many staff members"));
        }
        if state.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::StaffCreated {
            staff: Staff { id, name, active: true },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn remove_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.staff.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::StaffRemoved { id }).await
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        name: String,
        kind: ServiceKind,
        duration_min: Option<Minutes>,
        price_cents: i64,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        if let Some(d) = duration_min
            && d <= 0 {
                return Err(EngineError::LimitExceeded("duration must be positive"));
            }
        if price_cents < 0 {
            return Err(EngineError::LimitExceeded("price must not be negative"));
        }
        let mut state = self.state.write().await;
        if state.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        if state.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::ServiceCreated {
            service: Service { id, name, kind, duration_min, price_cents, active: true },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::ServiceRemoved { id }).await
    }

    // ── Catalog: resources ───────────────────────────────────────

    pub async fn add_resource_type(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        check_name(&name)?;
        let mut state = self.state.write().await;
        if state.resource_types.len() >= MAX_RESOURCE_TYPES {
            return Err(EngineError::LimitExceeded("too many resource types"));
        }
        if state.resource_types.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let event = Event::ResourceTypeCreated {
            resource_type: ResourceType { id, name },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn remove_resource_type(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.resource_types.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if state.units.values().any(|u| u.type_id == id) {
            return Err(EngineError::LimitExceeded("resource type still has units"));
        }
        self.persist_and_apply(&mut state, &Event::ResourceTypeRemoved { id }).await
    }

    pub async fn add_unit(&self, id: Ulid, type_id: Ulid, status: UnitStatus) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if state.units.len() >= MAX_UNITS {
            return Err(EngineError::LimitExceeded("too many resource units"));
        }
        if state.units.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !state.resource_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }
        let event = Event::UnitAdded {
            unit: ResourceUnit { id, type_id, status, active: true },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn set_unit_status(&self, id: Ulid, status: UnitStatus) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.units.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::UnitStatusChanged { id, status }).await
    }

    pub async fn remove_unit(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.units.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::UnitRemoved { id }).await
    }

    pub async fn declare_need(
        &self,
        id: Ulid,
        service_id: Ulid,
        type_id: Ulid,
        required: bool,
        units: u32,
    ) -> Result<(), EngineError> {
        if units == 0 {
            return Err(EngineError::LimitExceeded("need must take at least one unit"));
        }
        let mut state = self.state.write().await;
        if state.needs.len() >= MAX_NEEDS {
            return Err(EngineError::LimitExceeded("too many service needs"));
        }
        if state.needs.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !state.services.contains_key(&service_id) {
            return Err(EngineError::NotFound(service_id));
        }
        if !state.resource_types.contains_key(&type_id) {
            return Err(EngineError::NotFound(type_id));
        }
        let event = Event::NeedDeclared {
            need: ServiceNeed { id, service_id, type_id, required, units },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn remove_need(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.needs.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::NeedRemoved { id }).await
    }

    // ── Catalog: rules, blackouts, policy ────────────────────────

    pub async fn add_rule(&self, rule: WeeklyRule) -> Result<(), EngineError> {
        if rule.weekday > 6 {
            return Err(EngineError::LimitExceeded("weekday must be 0-6"));
        }
        if rule.start >= rule.end {
            return Err(EngineError::LimitExceeded("rule must end after it starts"));
        }
        if let (Some(from), Some(to)) = (rule.valid_from, rule.valid_to)
            && from > to {
                return Err(EngineError::LimitExceeded("validity range is inverted"));
            }
        let mut state = self.state.write().await;
        if state.rules.len() >= MAX_RULES {
            return Err(EngineError::LimitExceeded("too many rules"));
        }
        if state.rules.contains_key(&rule.id) {
            return Err(EngineError::AlreadyExists(rule.id));
        }
        if let Some(staff_id) = rule.staff_id
            && !state.staff.contains_key(&staff_id) {
                return Err(EngineError::NotFound(staff_id));
            }
        self.persist_and_apply(&mut state, &Event::RuleAdded { rule }).await
    }

    pub async fn remove_rule(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.rules.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::RuleRemoved { id }).await
    }

    pub async fn add_blackout(
        &self,
        id: Ulid,
        staff_id: Option<Ulid>,
        span: Span,
        reason: String,
        all_day: bool,
    ) -> Result<(), EngineError> {
        if span.end <= span.start {
            return Err(EngineError::LimitExceeded("blackout must end after it starts"));
        }
        if reason.len() > MAX_REASON_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut state = self.state.write().await;
        if state.blackouts.len() >= MAX_BLACKOUTS {
            return Err(EngineError::LimitExceeded("too many blackouts"));
        }
        if state.blackouts.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(staff_id) = staff_id
            && !state.staff.contains_key(&staff_id) {
                return Err(EngineError::NotFound(staff_id));
            }
        let event = Event::BlackoutAdded {
            blackout: Blackout { id, staff_id, span, reason, all_day },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn remove_blackout(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.blackouts.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::BlackoutRemoved { id }).await
    }

    pub async fn update_policy(&self, patch: PolicyPatch) -> Result<Policy, EngineError> {
        let mut state = self.state.write().await;
        let mut policy = state.policy.clone();
        if let Some(v) = patch.slot_minutes {
            if !(MIN_SLOT_MINUTES..=MAX_SLOT_MINUTES).contains(&v) {
                return Err(EngineError::LimitExceeded("slot granularity out of range"));
            }
            policy.slot_minutes = v;
        }
        if let Some(v) = patch.horizon_days {
            if v == 0 || v > MAX_HORIZON_DAYS {
                return Err(EngineError::LimitExceeded("booking horizon out of range"));
            }
            policy.horizon_days = v;
        }
        if let Some(v) = patch.deposit_cents {
            if v < 0 {
                return Err(EngineError::LimitExceeded("deposit must not be negative"));
            }
            policy.deposit_cents = v;
        }
        if let Some(v) = patch.deposit_hours {
            if v <= 0 || v > MAX_DEPOSIT_HOURS {
                return Err(EngineError::LimitExceeded("deposit window out of range"));
            }
            policy.deposit_hours = v;
        }
        if let Some(v) = patch.max_reprograms {
            if v > MAX_REPROGRAM_LIMIT {
                return Err(EngineError::LimitExceeded("reprogram limit out of range"));
            }
            policy.max_reprograms = v;
        }
        if let Some(v) = patch.cutoff_hours {
            if v < 0 || v > MAX_CUTOFF_HOURS {
                return Err(EngineError::LimitExceeded("cancellation cutoff out of range"));
            }
            policy.cutoff_hours = v;
        }
        let event = Event::PolicyUpdated { policy: policy.clone() };
        self.persist_and_apply(&mut state, &event).await?;
        Ok(policy)
    }

    // ── Waitlist ─────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn join_waitlist(
        &self,
        id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        from_date: NaiveDate,
        to_date: NaiveDate,
        from_time: Option<NaiveTime>,
        to_time: Option<NaiveTime>,
        now: NaiveDateTime,
    ) -> Result<(), EngineError> {
        if from_date > to_date {
            return Err(EngineError::LimitExceeded("date range is inverted"));
        }
        if let (Some(from), Some(to)) = (from_time, to_time)
            && from >= to {
                return Err(EngineError::LimitExceeded("time range is inverted"));
            }
        let mut state = self.state.write().await;
        if state.waitlist.len() >= MAX_WAITLIST {
            return Err(EngineError::LimitExceeded("waitlist is full"));
        }
        if state.waitlist.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !state.services.contains_key(&service_id) {
            return Err(EngineError::NotFound(service_id));
        }
        let event = Event::WaitlistJoined {
            entry: WaitlistEntry {
                id,
                client_id,
                service_id,
                from_date,
                to_date,
                from_time,
                to_time,
                active: true,
                notified: false,
                created_at: now,
            },
        };
        self.persist_and_apply(&mut state, &event).await
    }

    pub async fn leave_waitlist(&self, id: Ulid) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if !state.waitlist.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_and_apply(&mut state, &Event::WaitlistLeft { id }).await
    }

    // ── Appointment lifecycle ────────────────────────────────────

    /// Book a slot. Validation and commit run under one write lock, so two
    /// racing requests for the same slot cannot both pass.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_appointment(
        &self,
        id: Ulid,
        client_id: Ulid,
        staff_id: Option<Ulid>,
        service_ids: &[Ulid],
        date: NaiveDate,
        start: NaiveTime,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let staff_id = staff_id.ok_or(EngineError::MissingStaff)?;
        if service_ids.is_empty() {
            return Err(EngineError::LimitExceeded("at least one service is required"));
        }
        if service_ids.len() > MAX_SERVICES_PER_APPOINTMENT {
            return Err(EngineError::LimitExceeded("too many services on one appointment"));
        }
        for (i, sid) in service_ids.iter().enumerate() {
            if service_ids[..i].contains(sid) {
                return Err(EngineError::DuplicateService(*sid));
            }
        }

        let mut state = self.state.write().await;
        if state.appointments.len() >= MAX_APPOINTMENTS {
            return Err(EngineError::LimitExceeded("too many appointments"));
        }
        if state.appointments.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        match state.staff.get(&staff_id) {
            Some(s) if s.active => {}
            _ => return Err(EngineError::NotFound(staff_id)),
        }

        // Snapshot price and duration now; later catalog edits must not
        // change what was booked.
        let mut items = Vec::with_capacity(service_ids.len());
        for sid in service_ids {
            match state.services.get(sid) {
                Some(s) if s.active => items.push(LineItem {
                    service_id: *sid,
                    price_cents: s.price_cents,
                    duration_min: s.duration_or_default(),
                }),
                _ => return Err(EngineError::NotFound(*sid)),
            }
        }

        let appointment = Appointment {
            id,
            client_id,
            staff_id,
            date,
            start,
            items,
            state: AppointmentState::Requested,
            reprogram_count: 0,
            deposit_deadline: None,
            cancel_reason: None,
        };

        if appointment.start_at() <= now {
            return Err(EngineError::InPast);
        }
        let horizon_end = now
            .date()
            .checked_add_days(chrono::Days::new(u64::from(state.policy.horizon_days)))
            .unwrap_or(now.date());
        if date > horizon_end {
            return Err(EngineError::LimitExceeded("date is beyond the booking horizon"));
        }
        let duplicate = state.appointments_on(date).any(|a| {
            a.client_id == client_id && a.start == start && a.state != AppointmentState::Cancelled
        });
        if duplicate {
            return Err(EngineError::DuplicateRequest);
        }

        let kinds = booking_kinds(&state, &appointment.items);
        if !slot_within_rules(&state, staff_id, date, start, appointment.total_duration_min(), &kinds) {
            return Err(EngineError::SlotUnavailable(SlotConflict::Closed));
        }
        check_slot(&state, staff_id, &appointment.span(), &appointment.items, None)?;

        let event = Event::AppointmentPlaced { appointment: appointment.clone() };
        self.persist_and_apply(&mut state, &event).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::Requested },
        );
        Ok(appointment)
    }

    /// Staff review: Requested → AwaitingDeposit, deposit clock starts.
    pub async fn approve_appointment(
        &self,
        id: Ulid,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state != AppointmentState::Requested {
            return Err(EngineError::InvalidState { state: appt.state, action: "approve" });
        }
        let client_id = appt.client_id;
        let deadline = now + Duration::hours(state.policy.deposit_hours);
        let event = Event::AppointmentApproved { id, deposit_deadline: deadline };
        self.persist_and_apply(&mut state, &event).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::AwaitingDeposit },
        );
        Ok(state.appointments[&id].clone())
    }

    /// Deposit received: AwaitingDeposit → Confirmed, deadline cleared.
    pub async fn confirm_deposit(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state != AppointmentState::AwaitingDeposit {
            return Err(EngineError::InvalidState { state: appt.state, action: "confirm a deposit for" });
        }
        let client_id = appt.client_id;
        self.persist_and_apply(&mut state, &Event::DepositConfirmed { id }).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::Confirmed },
        );
        Ok(state.appointments[&id].clone())
    }

    /// Move an appointment to a new date and start time. The rules depend
    /// on the current state; see the per-state match below.
    pub async fn reprogram_appointment(
        &self,
        id: Ulid,
        new_date: NaiveDate,
        new_start: NaiveTime,
        actor: Actor,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state.terminal() {
            return Err(EngineError::InvalidState { state: appt.state, action: "reprogram" });
        }

        let (next_state, next_count) = match appt.state {
            // Still under review: move freely, approval not yet granted.
            AppointmentState::Requested => (AppointmentState::Requested, appt.reprogram_count),
            // Moving invalidates the approval; staff must re-approve.
            AppointmentState::AwaitingDeposit => {
                (AppointmentState::Requested, appt.reprogram_count)
            }
            // Deposit carries over, but moves are limited and clients must
            // stay outside the cutoff window.
            AppointmentState::Confirmed => {
                if appt.reprogram_count >= state.policy.max_reprograms {
                    return Err(EngineError::ReprogramLimitExceeded {
                        limit: state.policy.max_reprograms,
                    });
                }
                if actor == Actor::Client {
                    cutoff_guard(&state.policy, appt, now)?;
                }
                (AppointmentState::Confirmed, appt.reprogram_count + 1)
            }
            _ => unreachable!("terminal states rejected above"),
        };

        let client_id = appt.client_id;
        let staff_id = appt.staff_id;
        let duration = appt.total_duration_min();
        let items = appt.items.clone();
        let moved = Span::new(
            new_date.and_time(new_start),
            new_date.and_time(new_start) + Duration::minutes(duration),
        );
        if moved.start <= now {
            return Err(EngineError::InPast);
        }
        let kinds = booking_kinds(&state, &items);
        if !slot_within_rules(&state, staff_id, new_date, new_start, duration, &kinds) {
            return Err(EngineError::SlotUnavailable(SlotConflict::Closed));
        }
        // The appointment's own occupancy must not block its move.
        check_slot(&state, staff_id, &moved, &items, Some(id))?;

        let event = Event::AppointmentReprogrammed {
            id,
            date: new_date,
            start: new_start,
            state: next_state,
            reprogram_count: next_count,
        };
        self.persist_and_apply(&mut state, &event).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: next_state },
        );
        Ok(state.appointments[&id].clone())
    }

    /// Cancel from any non-terminal state, then offer the freed slot to the
    /// waitlist and to later confirmed appointments.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        actor: Actor,
        reason: Option<String>,
        now: NaiveDateTime,
    ) -> Result<CancelOutcome, EngineError> {
        if let Some(ref r) = reason
            && r.len() > MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("reason too long"));
            }
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state.terminal() {
            return Err(EngineError::InvalidState { state: appt.state, action: "cancel" });
        }
        if actor == Actor::Client && appt.state == AppointmentState::Confirmed {
            cutoff_guard(&state.policy, appt, now)?;
        }

        // Snapshot before the state write; the optimizer works from the
        // freed values, not from the mutated row.
        let freed = FreedSlot::of(appt);
        let client_id = appt.client_id;

        let event = Event::AppointmentCancelled { id, reason, by: actor };
        self.persist_and_apply(&mut state, &event).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::Cancelled },
        );

        // Reclamation only makes sense for slots still ahead of us.
        let offers = if freed.start_at() > now {
            reclaim::run(self, &mut state, &freed, now).await
        } else {
            Vec::new()
        };
        info!(appointment = %id, offers = offers.len(), "cancelled");

        Ok(CancelOutcome { appointment: state.appointments[&id].clone(), offers })
    }

    /// Confirmed → Completed. Emits the post-service follow-up notice for
    /// the external routine subsystem; delivery is fire-and-forget.
    pub async fn complete_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state != AppointmentState::Confirmed {
            return Err(EngineError::InvalidState { state: appt.state, action: "complete" });
        }
        let client_id = appt.client_id;
        let service_ids: Vec<Ulid> = appt.service_ids().collect();
        self.persist_and_apply(&mut state, &Event::AppointmentCompleted { id }).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::Completed },
        );
        self.notify.send_follow_up(Notice::FollowUpDue { appointment_id: id, client_id, service_ids });
        Ok(state.appointments[&id].clone())
    }

    /// Confirmed → NoShow.
    pub async fn mark_no_show(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let appt = state.appointments.get(&id).ok_or(EngineError::NotFound(id))?;
        if appt.state != AppointmentState::Confirmed {
            return Err(EngineError::InvalidState { state: appt.state, action: "mark no-show for" });
        }
        let client_id = appt.client_id;
        self.persist_and_apply(&mut state, &Event::AppointmentNoShow { id }).await?;
        self.notify.send(
            client_id,
            Notice::AppointmentState { appointment_id: id, state: AppointmentState::NoShow },
        );
        Ok(state.appointments[&id].clone())
    }

    /// Idempotent expiry sweep over "now" and the booking set. Cancels
    /// pending appointments whose scheduled time passed and approved ones
    /// whose deposit window lapsed. Safe to run from the background sweeper
    /// and from read paths; a second run over the same state is a no-op.
    pub async fn sweep_expired(&self, now: NaiveDateTime) -> Result<Vec<Ulid>, EngineError> {
        let mut state = self.state.write().await;

        struct Expiry {
            id: Ulid,
            client_id: Ulid,
            reason: &'static str,
            freed: Option<FreedSlot>,
        }

        let mut expirations: Vec<Expiry> = Vec::new();
        for appt in state.appointments.values() {
            let lapsed_deposit = appt.state == AppointmentState::AwaitingDeposit
                && appt.deposit_deadline.is_some_and(|d| d < now);
            let elapsed = matches!(
                appt.state,
                AppointmentState::Requested | AppointmentState::AwaitingDeposit
            ) && appt.start_at() <= now;

            if elapsed {
                expirations.push(Expiry {
                    id: appt.id,
                    client_id: appt.client_id,
                    reason: "scheduled time passed without confirmation",
                    // The slot is already in the past; nothing to reclaim.
                    freed: None,
                });
            } else if lapsed_deposit {
                expirations.push(Expiry {
                    id: appt.id,
                    client_id: appt.client_id,
                    reason: "deposit window lapsed",
                    freed: Some(FreedSlot::of(appt)),
                });
            }
        }
        // Deterministic order regardless of map iteration.
        expirations.sort_by_key(|e| e.id);

        let mut swept = Vec::with_capacity(expirations.len());
        for exp in expirations {
            let event = Event::AppointmentCancelled {
                id: exp.id,
                reason: Some(exp.reason.to_string()),
                by: Actor::System,
            };
            if let Err(e) = self.persist_and_apply(&mut state, &event).await {
                // Sweep is re-run on the next tick; skip and keep going.
                warn!(appointment = %exp.id, error = %e, "expiry sweep skip");
                continue;
            }
            self.notify.send(
                exp.client_id,
                Notice::AppointmentState {
                    appointment_id: exp.id,
                    state: AppointmentState::Cancelled,
                },
            );
            if let Some(freed) = exp.freed {
                reclaim::run(self, &mut state, &freed, now).await;
            }
            swept.push(exp.id);
        }
        if !swept.is_empty() {
            info!(count = swept.len(), "expired appointments cancelled");
        }
        Ok(swept)
    }
}
