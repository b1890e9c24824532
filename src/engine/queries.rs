use chrono::{Days, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::DEFAULT_LOOKAHEAD_DAYS;
use crate::model::*;

use super::conflict::check_slot;
use super::slots::{candidate_starts, matching_rules};
use super::{Engine, EngineError};

impl Engine {
    /// Bookable slots for a service over the look-ahead window (default 7
    /// days, capped by the booking horizon). An empty result means nothing
    /// is available, never an error. Two queries without intervening
    /// bookings return identical results.
    pub async fn query_availability(
        &self,
        service_id: Ulid,
        from: Option<NaiveDate>,
        now: NaiveDateTime,
    ) -> Result<Vec<SlotRow>, EngineError> {
        let state = self.state.read().await;
        let service = match state.services.get(&service_id) {
            Some(s) if s.active => s.clone(),
            _ => return Err(EngineError::NotFound(service_id)),
        };
        let duration = service.duration_or_default();
        let granularity = state.policy.slot_minutes;
        let probe = [LineItem {
            service_id,
            price_cents: service.price_cents,
            duration_min: duration,
        }];

        let today = now.date();
        let from = from.unwrap_or(today).max(today);
        let horizon_end = today
            .checked_add_days(Days::new(u64::from(state.policy.horizon_days)))
            .unwrap_or(today);

        let mut staff: Vec<&Staff> = state.staff.values().filter(|s| s.active).collect();
        staff.sort_by_key(|s| s.id);

        let mut rows = Vec::new();
        for offset in 0..u64::from(DEFAULT_LOOKAHEAD_DAYS) {
            let Some(date) = from.checked_add_days(Days::new(offset)) else {
                break;
            };
            if date > horizon_end {
                break;
            }
            for member in &staff {
                for rule in
                    matching_rules(state.rules.values(), date, member.id, service.kind)
                {
                    for start in candidate_starts(rule, duration, granularity) {
                        let slot_start = date.and_time(start);
                        if slot_start <= now {
                            // Already elapsed today; never surfaced.
                            continue;
                        }
                        let span = Span::new(
                            slot_start,
                            slot_start + chrono::Duration::minutes(duration),
                        );
                        if check_slot(&state, member.id, &span, &probe, None).is_ok() {
                            rows.push(SlotRow { date, staff_id: member.id, start });
                        }
                    }
                }
            }
        }

        // Split shifts and salon-wide rules can emit the same start twice.
        rows.sort_by_key(|r| (r.date, r.staff_id, r.start));
        rows.dedup();
        Ok(rows)
    }

    pub async fn list_appointments(
        &self,
        client_id: Option<Ulid>,
        status: Option<AppointmentState>,
        date: Option<NaiveDate>,
    ) -> Vec<Appointment> {
        let state = self.state.read().await;
        let mut rows: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| client_id.is_none_or(|c| a.client_id == c))
            .filter(|a| status.is_none_or(|s| a.state == s))
            .filter(|a| date.is_none_or(|d| a.date == d))
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.date, a.start, a.id));
        rows
    }

    pub async fn get_appointment(&self, id: Ulid) -> Option<Appointment> {
        self.state.read().await.appointments.get(&id).cloned()
    }

    pub async fn list_offers(&self, client_id: Option<Ulid>) -> Vec<Offer> {
        let state = self.state.read().await;
        let mut rows: Vec<Offer> = state
            .offers
            .values()
            .filter(|o| client_id.is_none_or(|c| o.client_id == c))
            .cloned()
            .collect();
        rows.sort_by_key(|o| (o.created_at, o.id));
        rows
    }

    pub async fn list_waitlist(&self) -> Vec<WaitlistEntry> {
        let state = self.state.read().await;
        let mut rows: Vec<WaitlistEntry> = state.waitlist.values().cloned().collect();
        rows.sort_by_key(|e| (e.created_at, e.id));
        rows
    }

    pub async fn list_staff(&self) -> Vec<Staff> {
        let state = self.state.read().await;
        let mut rows: Vec<Staff> = state.staff.values().cloned().collect();
        rows.sort_by_key(|s| s.id);
        rows
    }

    pub async fn list_services(&self) -> Vec<Service> {
        let state = self.state.read().await;
        let mut rows: Vec<Service> = state.services.values().cloned().collect();
        rows.sort_by_key(|s| s.id);
        rows
    }

    pub async fn list_rules(&self) -> Vec<WeeklyRule> {
        let state = self.state.read().await;
        let mut rows: Vec<WeeklyRule> = state.rules.values().cloned().collect();
        rows.sort_by_key(|r| (r.weekday, r.start, r.id));
        rows
    }

    pub async fn list_blackouts(&self) -> Vec<Blackout> {
        let state = self.state.read().await;
        let mut rows: Vec<Blackout> = state.blackouts.values().cloned().collect();
        rows.sort_by_key(|b| (b.span.start, b.id));
        rows
    }

    pub async fn list_units(&self) -> Vec<ResourceUnit> {
        let state = self.state.read().await;
        let mut rows: Vec<ResourceUnit> = state.units.values().cloned().collect();
        rows.sort_by_key(|u| (u.type_id, u.id));
        rows
    }

    pub async fn policy(&self) -> Policy {
        self.state.read().await.policy.clone()
    }
}
