use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::limits::MAX_OFFERS;
use crate::model::*;
use crate::notify::Notice;

use super::conflict::check_slot;
use super::error::EngineError;
use super::lifecycle::{booking_kinds, slot_within_rules};
use super::state::SalonState;
use super::Engine;

/// Pre-cancellation snapshot of what a cancelled appointment held. The
/// optimizer works from these values, never from the mutated row.
#[derive(Debug, Clone)]
pub(super) struct FreedSlot {
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub service_ids: Vec<Ulid>,
}

impl FreedSlot {
    pub fn of(appt: &Appointment) -> Self {
        Self {
            client_id: appt.client_id,
            staff_id: appt.staff_id,
            date: appt.date,
            start: appt.start,
            service_ids: appt.service_ids().collect(),
        }
    }

    pub fn start_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }
}

enum Candidate {
    Waitlist { entry_id: Ulid, client_id: Ulid },
    Advance { appointment_id: Ulid, client_id: Ulid },
}

/// Offer a freed slot to the best candidates. Runs under the caller's write
/// lock, after the cancellation itself is durable. Best-effort: one failed
/// offer is logged and skipped, the rest still go out.
pub(super) async fn run(
    engine: &Engine,
    state: &mut SalonState,
    freed: &FreedSlot,
    now: NaiveDateTime,
) -> Vec<Offer> {
    let mut candidates: Vec<Candidate> = Vec::new();

    // Waitlist pool: active, not yet notified, FIFO by creation time.
    let mut waiting: Vec<&WaitlistEntry> = state
        .waitlist
        .values()
        .filter(|e| {
            e.active && !e.notified && e.wants(freed.date, freed.start, &freed.service_ids)
        })
        .collect();
    waiting.sort_by_key(|e| (e.created_at, e.id));
    candidates.extend(waiting.iter().map(|e| Candidate::Waitlist {
        entry_id: e.id,
        client_id: e.client_id,
    }));

    // Advance pool: other clients' confirmed appointments sharing a freed
    // service and scheduled strictly later than the freed date.
    let mut later: Vec<&Appointment> = state
        .appointments
        .values()
        .filter(|a| {
            a.state == AppointmentState::Confirmed
                && a.client_id != freed.client_id
                && a.date > freed.date
                && freed.service_ids.iter().any(|sid| a.includes_service(*sid))
        })
        .collect();
    later.sort_by_key(|a| (a.date, a.start, a.id));
    candidates.extend(later.iter().map(|a| Candidate::Advance {
        appointment_id: a.id,
        client_id: a.client_id,
    }));

    let mut issued = Vec::new();
    for candidate in candidates {
        if state.offers.len() >= MAX_OFFERS {
            warn!("offer cap reached, remaining candidates skipped");
            break;
        }
        let (client_id, source, waitlist_entry) = match candidate {
            Candidate::Waitlist { entry_id, client_id } => {
                (client_id, OfferSource::Waitlist(entry_id), Some(entry_id))
            }
            Candidate::Advance { appointment_id, client_id } => {
                (client_id, OfferSource::Advance(appointment_id), None)
            }
        };
        let offer = Offer {
            id: Ulid::new(),
            client_id,
            staff_id: freed.staff_id,
            date: freed.date,
            start: freed.start,
            service_ids: freed.service_ids.clone(),
            source,
            created_at: now,
            claimed: false,
        };
        if let Err(e) = engine
            .persist_and_apply(state, &Event::OfferIssued { offer: offer.clone() })
            .await
        {
            warn!(client = %client_id, error = %e, "offer skipped");
            continue;
        }
        // Never offer the same freed slot to a waitlist entry twice.
        if let Some(entry_id) = waitlist_entry
            && let Err(e) = engine
                .persist_and_apply(state, &Event::WaitlistNotified { id: entry_id })
                .await
        {
            warn!(entry = %entry_id, error = %e, "notified flag not recorded");
        }
        engine.notify.send(
            client_id,
            Notice::OfferIssued {
                offer_id: offer.id,
                date: offer.date,
                start: offer.start,
                service_ids: offer.service_ids.clone(),
            },
        );
        metrics::counter!(crate::observability::OFFERS_ISSUED_TOTAL).increment(1);
        debug!(offer = %offer.id, client = %client_id, "slot offered");
        issued.push(offer);
    }
    issued
}

impl Engine {
    /// Accept a reclaimed-slot offer. First acceptance wins: the slot is
    /// re-validated here, and a claimed or conflicting offer fails with
    /// SLOT_NO_LONGER_AVAILABLE.
    pub async fn accept_offer(
        &self,
        offer_id: Ulid,
        client_id: Ulid,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let mut state = self.state.write().await;
        let offer = state.offers.get(&offer_id).ok_or(EngineError::NotFound(offer_id))?;
        if offer.client_id != client_id {
            return Err(EngineError::NotFound(offer_id));
        }
        if offer.claimed {
            return Err(EngineError::SlotNoLongerAvailable);
        }
        let offer = offer.clone();
        if offer.date.and_time(offer.start) <= now {
            // The offered slot itself has elapsed.
            return Err(EngineError::SlotNoLongerAvailable);
        }

        match offer.source {
            OfferSource::Waitlist(entry_id) => {
                // Fresh request at the freed slot for the desired service.
                let service_id = state
                    .waitlist
                    .get(&entry_id)
                    .map(|e| e.service_id)
                    .ok_or(EngineError::NotFound(entry_id))?;
                let service = match state.services.get(&service_id) {
                    Some(s) if s.active => s.clone(),
                    _ => return Err(EngineError::SlotNoLongerAvailable),
                };
                let appointment = Appointment {
                    id: Ulid::new(),
                    client_id,
                    staff_id: offer.staff_id,
                    date: offer.date,
                    start: offer.start,
                    items: vec![LineItem {
                        service_id,
                        price_cents: service.price_cents,
                        duration_min: service.duration_or_default(),
                    }],
                    state: AppointmentState::Requested,
                    reprogram_count: 0,
                    deposit_deadline: None,
                    cancel_reason: None,
                };
                let kinds = booking_kinds(&state, &appointment.items);
                if !slot_within_rules(
                    &state,
                    offer.staff_id,
                    offer.date,
                    offer.start,
                    appointment.total_duration_min(),
                    &kinds,
                ) {
                    return Err(EngineError::SlotNoLongerAvailable);
                }
                if check_slot(&state, offer.staff_id, &appointment.span(), &appointment.items, None)
                    .is_err()
                {
                    return Err(EngineError::SlotNoLongerAvailable);
                }

                let placed = Event::AppointmentPlaced { appointment: appointment.clone() };
                self.persist_and_apply(&mut state, &placed).await?;
                self.persist_and_apply(
                    &mut state,
                    &Event::OfferClaimed { id: offer_id, appointment_id: appointment.id },
                )
                .await?;
                self.persist_and_apply(&mut state, &Event::WaitlistLeft { id: entry_id }).await?;
                self.notify.send(
                    client_id,
                    Notice::AppointmentState {
                        appointment_id: appointment.id,
                        state: AppointmentState::Requested,
                    },
                );
                Ok(appointment)
            }
            OfferSource::Advance(appointment_id) => {
                // Move the client's later confirmed appointment up to the
                // freed slot. The salon initiated this, so neither the
                // cutoff window nor the reprogram limit applies.
                let appt = state
                    .appointments
                    .get(&appointment_id)
                    .ok_or(EngineError::NotFound(appointment_id))?;
                if appt.client_id != client_id || appt.state != AppointmentState::Confirmed {
                    return Err(EngineError::SlotNoLongerAvailable);
                }
                let items = appt.items.clone();
                let duration = appt.total_duration_min();
                let count = appt.reprogram_count;

                let moved = Span::new(
                    offer.date.and_time(offer.start),
                    offer.date.and_time(offer.start) + chrono::Duration::minutes(duration),
                );
                let kinds = booking_kinds(&state, &items);
                if !slot_within_rules(&state, offer.staff_id, offer.date, offer.start, duration, &kinds) {
                    return Err(EngineError::SlotNoLongerAvailable);
                }
                if check_slot(&state, offer.staff_id, &moved, &items, Some(appointment_id)).is_err() {
                    return Err(EngineError::SlotNoLongerAvailable);
                }

                let event = Event::AppointmentReprogrammed {
                    id: appointment_id,
                    date: offer.date,
                    start: offer.start,
                    state: AppointmentState::Confirmed,
                    reprogram_count: count,
                };
                self.persist_and_apply(&mut state, &event).await?;
                self.persist_and_apply(
                    &mut state,
                    &Event::OfferClaimed { id: offer_id, appointment_id },
                )
                .await?;
                self.notify.send(
                    client_id,
                    Notice::AppointmentState {
                        appointment_id,
                        state: AppointmentState::Confirmed,
                    },
                );
                Ok(state.appointments[&appointment_id].clone())
            }
        }
    }
}
