use ulid::Ulid;

use crate::model::AppointmentState;

/// What a candidate slot collided with. Carried inside
/// [`EngineError::SlotUnavailable`] for logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotConflict {
    /// No availability rule opens the staff's day for this service.
    Closed,
    /// Overlapping occupying appointment for the same staff member.
    StaffBusy(Ulid),
    /// Overlapping blackout exception.
    Blackout(Ulid),
    /// A required resource type has no free unit in the interval.
    ResourcesSaturated { type_id: Ulid, operational: u32 },
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Client-submitted request without a staff assignment.
    MissingStaff,
    /// Same service listed twice on one appointment.
    DuplicateService(Ulid),
    /// The client already holds a non-cancelled appointment at this slot.
    DuplicateRequest,
    /// Requested start is not in the future.
    InPast,
    SlotUnavailable(SlotConflict),
    SlotNoLongerAvailable,
    TimeWindowExceeded { required_hours: i64, remaining_hours: i64 },
    ReprogramLimitExceeded { limit: u32 },
    InvalidState { state: AppointmentState, action: &'static str },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Machine-readable reason code, stable across message wording changes.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::MissingStaff => "MISSING_STAFF",
            EngineError::DuplicateService(_) => "DUPLICATE_SERVICE",
            EngineError::DuplicateRequest => "DUPLICATE_REQUEST",
            EngineError::InPast => "IN_PAST",
            EngineError::SlotUnavailable(_) => "SLOT_UNAVAILABLE",
            EngineError::SlotNoLongerAvailable => "SLOT_NO_LONGER_AVAILABLE",
            EngineError::TimeWindowExceeded { .. } => "TIME_WINDOW_EXCEEDED",
            EngineError::ReprogramLimitExceeded { .. } => "REPROGRAM_LIMIT_EXCEEDED",
            EngineError::InvalidState { .. } => "INVALID_STATE",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "WAL_ERROR",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "NOT_FOUND: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "ALREADY_EXISTS: {id}"),
            EngineError::MissingStaff => {
                write!(f, "MISSING_STAFF: a staff assignment is required")
            }
            EngineError::DuplicateService(id) => {
                write!(f, "DUPLICATE_SERVICE: {id} appears more than once")
            }
            EngineError::DuplicateRequest => write!(
                f,
                "DUPLICATE_REQUEST: client already booked this date and start time"
            ),
            EngineError::InPast => write!(f, "IN_PAST: requested start has already elapsed"),
            EngineError::SlotUnavailable(conflict) => match conflict {
                SlotConflict::Closed => {
                    write!(f, "SLOT_UNAVAILABLE: no working hours open this slot")
                }
                SlotConflict::StaffBusy(id) => {
                    write!(f, "SLOT_UNAVAILABLE: staff busy with appointment {id}")
                }
                SlotConflict::Blackout(id) => {
                    write!(f, "SLOT_UNAVAILABLE: blackout {id} covers the slot")
                }
                SlotConflict::ResourcesSaturated { type_id, operational } => write!(
                    f,
                    "SLOT_UNAVAILABLE: all {operational} units of resource type {type_id} are committed"
                ),
            },
            EngineError::SlotNoLongerAvailable => {
                write!(f, "SLOT_NO_LONGER_AVAILABLE: the offered slot was claimed first")
            }
            EngineError::TimeWindowExceeded { required_hours, remaining_hours } => write!(
                f,
                "TIME_WINDOW_EXCEEDED: {required_hours} hours required, only {remaining_hours} remain"
            ),
            EngineError::ReprogramLimitExceeded { limit } => write!(
                f,
                "REPROGRAM_LIMIT_EXCEEDED: confirmed appointments may move at most {limit} times"
            ),
            EngineError::InvalidState { state, action } => write!(
                f,
                "INVALID_STATE: cannot {action} an appointment in state {}",
                state.as_str()
            ),
            EngineError::LimitExceeded(msg) => write!(f, "LIMIT_EXCEEDED: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL_ERROR: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
