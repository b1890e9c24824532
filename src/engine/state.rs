use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Whole-salon in-memory state for one tenant. Guarded by a single RwLock
/// in the engine: every lifecycle mutation runs validate + commit under one
/// write lock, which is the serializable boundary for the read-check-write
/// booking flow.
#[derive(Debug, Default)]
pub struct SalonState {
    pub policy: Policy,
    pub staff: HashMap<Ulid, Staff>,
    pub services: HashMap<Ulid, Service>,
    pub resource_types: HashMap<Ulid, ResourceType>,
    pub units: HashMap<Ulid, ResourceUnit>,
    pub needs: HashMap<Ulid, ServiceNeed>,
    pub rules: HashMap<Ulid, WeeklyRule>,
    pub blackouts: HashMap<Ulid, Blackout>,
    pub appointments: HashMap<Ulid, Appointment>,
    /// Appointment ids per calendar date, maintained across reprograms.
    pub by_day: BTreeMap<NaiveDate, Vec<Ulid>>,
    pub waitlist: HashMap<Ulid, WaitlistEntry>,
    pub offers: HashMap<Ulid, Offer>,
}

impl SalonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_of(&self, service_id: Ulid) -> impl Iterator<Item = &ServiceNeed> {
        self.needs.values().filter(move |n| n.service_id == service_id)
    }

    /// Operational unit count for a resource type.
    pub fn operational_units(&self, type_id: Ulid) -> u32 {
        self.units
            .values()
            .filter(|u| u.type_id == type_id && u.operational())
            .count() as u32
    }

    pub fn appointments_on(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        self.by_day
            .get(&date)
            .into_iter()
            .flatten()
            .filter_map(|id| self.appointments.get(id))
    }

    fn index_day(&mut self, date: NaiveDate, id: Ulid) {
        self.by_day.entry(date).or_default().push(id);
    }

    fn unindex_day(&mut self, date: NaiveDate, id: Ulid) {
        if let Some(ids) = self.by_day.get_mut(&date) {
            ids.retain(|a| *a != id);
            if ids.is_empty() {
                self.by_day.remove(&date);
            }
        }
    }

    /// Apply an event. Pure state transition, shared by the live mutation
    /// path and WAL replay, so it must never consult the clock or validate.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::StaffCreated { staff } => {
                self.staff.insert(staff.id, staff.clone());
            }
            Event::StaffRemoved { id } => {
                self.staff.remove(id);
            }
            Event::ServiceCreated { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceRemoved { id } => {
                self.services.remove(id);
            }
            Event::ResourceTypeCreated { resource_type } => {
                self.resource_types.insert(resource_type.id, resource_type.clone());
            }
            Event::ResourceTypeRemoved { id } => {
                self.resource_types.remove(id);
            }
            Event::UnitAdded { unit } => {
                self.units.insert(unit.id, unit.clone());
            }
            Event::UnitStatusChanged { id, status } => {
                if let Some(unit) = self.units.get_mut(id) {
                    unit.status = *status;
                }
            }
            Event::UnitRemoved { id } => {
                self.units.remove(id);
            }
            Event::NeedDeclared { need } => {
                self.needs.insert(need.id, need.clone());
            }
            Event::NeedRemoved { id } => {
                self.needs.remove(id);
            }
            Event::RuleAdded { rule } => {
                self.rules.insert(rule.id, rule.clone());
            }
            Event::RuleRemoved { id } => {
                self.rules.remove(id);
            }
            Event::BlackoutAdded { blackout } => {
                self.blackouts.insert(blackout.id, blackout.clone());
            }
            Event::BlackoutRemoved { id } => {
                self.blackouts.remove(id);
            }
            Event::PolicyUpdated { policy } => {
                self.policy = policy.clone();
            }
            Event::AppointmentPlaced { appointment } => {
                self.index_day(appointment.date, appointment.id);
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentApproved { id, deposit_deadline } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.state = AppointmentState::AwaitingDeposit;
                    appt.deposit_deadline = Some(*deposit_deadline);
                }
            }
            Event::DepositConfirmed { id } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.state = AppointmentState::Confirmed;
                    appt.deposit_deadline = None;
                }
            }
            Event::AppointmentReprogrammed { id, date, start, state, reprogram_count } => {
                let old_date = match self.appointments.get(id) {
                    Some(a) => a.date,
                    None => return,
                };
                if old_date != *date {
                    self.unindex_day(old_date, *id);
                    self.index_day(*date, *id);
                }
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.date = *date;
                    appt.start = *start;
                    appt.state = *state;
                    appt.reprogram_count = *reprogram_count;
                    appt.deposit_deadline = None;
                }
            }
            Event::AppointmentCancelled { id, reason, .. } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.state = AppointmentState::Cancelled;
                    appt.deposit_deadline = None;
                    appt.cancel_reason = reason.clone();
                }
            }
            Event::AppointmentCompleted { id } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.state = AppointmentState::Completed;
                }
            }
            Event::AppointmentNoShow { id } => {
                if let Some(appt) = self.appointments.get_mut(id) {
                    appt.state = AppointmentState::NoShow;
                }
            }
            Event::WaitlistJoined { entry } => {
                self.waitlist.insert(entry.id, entry.clone());
            }
            Event::WaitlistLeft { id } => {
                if let Some(entry) = self.waitlist.get_mut(id) {
                    entry.active = false;
                }
            }
            Event::WaitlistNotified { id } => {
                if let Some(entry) = self.waitlist.get_mut(id) {
                    entry.notified = true;
                }
            }
            Event::OfferIssued { offer } => {
                self.offers.insert(offer.id, offer.clone());
            }
            Event::OfferClaimed { id, .. } => {
                if let Some(offer) = self.offers.get_mut(id) {
                    offer.claimed = true;
                }
            }
        }
    }

    /// Minimal event list that recreates the current state on replay.
    /// Ordering puts catalog rows before the appointments referencing them.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        events.push(Event::PolicyUpdated { policy: self.policy.clone() });
        for staff in self.staff.values() {
            events.push(Event::StaffCreated { staff: staff.clone() });
        }
        for service in self.services.values() {
            events.push(Event::ServiceCreated { service: service.clone() });
        }
        for resource_type in self.resource_types.values() {
            events.push(Event::ResourceTypeCreated { resource_type: resource_type.clone() });
        }
        for unit in self.units.values() {
            events.push(Event::UnitAdded { unit: unit.clone() });
        }
        for need in self.needs.values() {
            events.push(Event::NeedDeclared { need: need.clone() });
        }
        for rule in self.rules.values() {
            events.push(Event::RuleAdded { rule: rule.clone() });
        }
        for blackout in self.blackouts.values() {
            events.push(Event::BlackoutAdded { blackout: blackout.clone() });
        }
        for appointment in self.appointments.values() {
            events.push(Event::AppointmentPlaced { appointment: appointment.clone() });
        }
        for entry in self.waitlist.values() {
            events.push(Event::WaitlistJoined { entry: entry.clone() });
        }
        for offer in self.offers.values() {
            events.push(Event::OfferIssued { offer: offer.clone() });
        }
        events
    }
}
