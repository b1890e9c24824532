use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Durations and granularities are whole minutes.
pub type Minutes = i64;

/// Applied when a service has no estimated duration.
pub const DEFAULT_SERVICE_DURATION_MIN: Minutes = 60;

/// Half-open interval `[start, end)` in salon-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minutes {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Catalog entities ─────────────────────────────────────────────

/// Which rule capability flag a service falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Long chemical/color work; only bookable on rules flagged for it.
    ColorDesign,
    /// Short complement work (cut, styling, treatment).
    Complement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub kind: ServiceKind,
    /// Estimated minutes; `None` falls back to [`DEFAULT_SERVICE_DURATION_MIN`].
    pub duration_min: Option<Minutes>,
    pub price_cents: i64,
    pub active: bool,
}

impl Service {
    pub fn duration_or_default(&self) -> Minutes {
        self.duration_min.unwrap_or(DEFAULT_SERVICE_DURATION_MIN)
    }
}

/// Weekly recurring working window for one staff member (or everyone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    pub id: Ulid,
    /// `None` applies to every active staff member.
    pub staff_id: Option<Ulid>,
    /// Monday = 0 … Sunday = 6.
    pub weekday: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub color_design: bool,
    pub complement: bool,
    pub active: bool,
}

impl WeeklyRule {
    /// Weekday + validity range + active flag match for `date`.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        if !self.active {
            return false;
        }
        if date.weekday().num_days_from_monday() != u32::from(self.weekday) {
            return false;
        }
        if let Some(from) = self.valid_from
            && date < from {
                return false;
            }
        if let Some(to) = self.valid_to
            && date > to {
                return false;
            }
        true
    }

    pub fn allows(&self, kind: ServiceKind) -> bool {
        match kind {
            ServiceKind::ColorDesign => self.color_design,
            ServiceKind::Complement => self.complement,
        }
    }

    pub fn covers_staff(&self, staff_id: Ulid) -> bool {
        self.staff_id.is_none_or(|s| s == staff_id)
    }
}

/// Point-in-time exception that suspends availability rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub id: Ulid,
    /// `None` closes the whole salon.
    pub staff_id: Option<Ulid>,
    pub span: Span,
    pub reason: String,
    pub all_day: bool,
}

impl Blackout {
    /// The blocked interval, widened to full days when `all_day` is set.
    pub fn effective_span(&self) -> Span {
        if !self.all_day {
            return self.span;
        }
        let start = self.span.start.date().and_time(NaiveTime::MIN);
        let end_date = self.span.end.date();
        // [start-of-first-day, start-of-day-after-last)
        let end = end_date
            .succ_opt()
            .unwrap_or(end_date)
            .and_time(NaiveTime::MIN);
        Span::new(start, end)
    }

    pub fn covers_staff(&self, staff_id: Ulid) -> bool {
        self.staff_id.is_none_or(|s| s == staff_id)
    }
}

// ── Physical resources ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    Available,
    InUse,
    Maintenance,
    Retired,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "available",
            UnitStatus::InUse => "in_use",
            UnitStatus::Maintenance => "maintenance",
            UnitStatus::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUnit {
    pub id: Ulid,
    pub type_id: Ulid,
    pub status: UnitStatus,
    pub active: bool,
}

impl ResourceUnit {
    /// Counts toward capacity: active and not pulled from the floor.
    pub fn operational(&self) -> bool {
        self.active && matches!(self.status, UnitStatus::Available | UnitStatus::InUse)
    }
}

/// Declares that a service consumes units of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNeed {
    pub id: Ulid,
    pub service_id: Ulid,
    pub type_id: Ulid,
    pub required: bool,
    pub units: u32,
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppointmentState {
    /// Placed by the client, pending staff review.
    Requested,
    /// Approved; the deposit clock is running.
    AwaitingDeposit,
    /// Deposit received.
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentState {
    /// States that hold the staff's time and the salon's resources.
    pub fn occupies(&self) -> bool {
        matches!(
            self,
            AppointmentState::Requested
                | AppointmentState::AwaitingDeposit
                | AppointmentState::Confirmed
        )
    }

    pub fn terminal(&self) -> bool {
        matches!(
            self,
            AppointmentState::Completed | AppointmentState::Cancelled | AppointmentState::NoShow
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentState::Requested => "requested",
            AppointmentState::AwaitingDeposit => "awaiting_deposit",
            AppointmentState::Confirmed => "confirmed",
            AppointmentState::Completed => "completed",
            AppointmentState::Cancelled => "cancelled",
            AppointmentState::NoShow => "no_show",
        }
    }
}

/// Price and duration are snapshots taken at booking time; later catalog
/// edits never touch existing appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub service_id: Ulid,
    pub price_cents: i64,
    pub duration_min: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub items: Vec<LineItem>,
    pub state: AppointmentState,
    pub reprogram_count: u32,
    pub deposit_deadline: Option<NaiveDateTime>,
    pub cancel_reason: Option<String>,
}

impl Appointment {
    pub fn total_duration_min(&self) -> Minutes {
        self.items.iter().map(|i| i.duration_min).sum()
    }

    pub fn total_price_cents(&self) -> i64 {
        self.items.iter().map(|i| i.price_cents).sum()
    }

    pub fn start_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.start_at() + Duration::minutes(self.total_duration_min())
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_at(), self.end_at())
    }

    pub fn service_ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.items.iter().map(|i| i.service_id)
    }

    pub fn includes_service(&self, service_id: Ulid) -> bool {
        self.items.iter().any(|i| i.service_id == service_id)
    }
}

/// Who initiated a lifecycle action. Client actions are subject to the
/// cutoff window; staff and system actions are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    Client,
    Staff,
    System,
}

// ── Waitlist and reclamation offers ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub from_time: Option<NaiveTime>,
    pub to_time: Option<NaiveTime>,
    pub active: bool,
    pub notified: bool,
    pub created_at: NaiveDateTime,
}

impl WaitlistEntry {
    /// Date range contains the freed date, the desired service is among the
    /// freed services, and the optional time window contains the freed start.
    pub fn wants(&self, date: NaiveDate, start: NaiveTime, freed_services: &[Ulid]) -> bool {
        if date < self.from_date || date > self.to_date {
            return false;
        }
        if !freed_services.contains(&self.service_id) {
            return false;
        }
        if let Some(from) = self.from_time
            && start < from {
                return false;
            }
        if let Some(to) = self.to_time
            && start > to {
                return false;
            }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferSource {
    /// Matched waitlist entry.
    Waitlist(Ulid),
    /// A later Confirmed appointment that could move up.
    Advance(Ulid),
}

/// A freed slot offered to one client. Durable so acceptance can be
/// re-validated long after the cancellation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub service_ids: Vec<Ulid>,
    pub source: OfferSource,
    pub created_at: NaiveDateTime,
    pub claimed: bool,
}

// ── Policy ───────────────────────────────────────────────────────

/// Per-tenant business configuration. Created once with defaults, only
/// ever updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub slot_minutes: Minutes,
    pub horizon_days: u32,
    pub deposit_cents: i64,
    pub deposit_hours: i64,
    pub max_reprograms: u32,
    pub cutoff_hours: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            horizon_days: 30,
            deposit_cents: 5_000,
            deposit_hours: 24,
            max_reprograms: 2,
            cutoff_hours: 48,
        }
    }
}

/// Partial policy update; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyPatch {
    pub slot_minutes: Option<Minutes>,
    pub horizon_days: Option<u32>,
    pub deposit_cents: Option<i64>,
    pub deposit_hours: Option<i64>,
    pub max_reprograms: Option<u32>,
    pub cutoff_hours: Option<i64>,
}

// ── WAL events ───────────────────────────────────────────────────

/// The event types — flat, no nesting. This is the WAL record format.
/// Events carry resulting values so replay is pure application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffCreated { staff: Staff },
    StaffRemoved { id: Ulid },
    ServiceCreated { service: Service },
    ServiceRemoved { id: Ulid },
    ResourceTypeCreated { resource_type: ResourceType },
    ResourceTypeRemoved { id: Ulid },
    UnitAdded { unit: ResourceUnit },
    UnitStatusChanged { id: Ulid, status: UnitStatus },
    UnitRemoved { id: Ulid },
    NeedDeclared { need: ServiceNeed },
    NeedRemoved { id: Ulid },
    RuleAdded { rule: WeeklyRule },
    RuleRemoved { id: Ulid },
    BlackoutAdded { blackout: Blackout },
    BlackoutRemoved { id: Ulid },
    PolicyUpdated { policy: Policy },
    AppointmentPlaced { appointment: Appointment },
    AppointmentApproved { id: Ulid, deposit_deadline: NaiveDateTime },
    DepositConfirmed { id: Ulid },
    AppointmentReprogrammed {
        id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
        state: AppointmentState,
        reprogram_count: u32,
    },
    AppointmentCancelled {
        id: Ulid,
        reason: Option<String>,
        by: Actor,
    },
    AppointmentCompleted { id: Ulid },
    AppointmentNoShow { id: Ulid },
    WaitlistJoined { entry: WaitlistEntry },
    WaitlistLeft { id: Ulid },
    WaitlistNotified { id: Ulid },
    OfferIssued { offer: Offer },
    OfferClaimed { id: Ulid, appointment_id: Ulid },
}

// ── Query result types ───────────────────────────────────────────

/// One bookable start time for one staff member on one date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRow {
    pub date: NaiveDate,
    pub staff_id: Ulid,
    pub start: NaiveTime,
}

/// Cancellation result: the terminal appointment plus the offers the
/// reclamation pass issued for its freed slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelOutcome {
    pub appointment: Appointment,
    pub offers: Vec<Offer>,
}
