//! Hard caps. Everything a client can grow is bounded.

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_REASON_LEN: usize = 500;

pub const MAX_STAFF: usize = 256;
pub const MAX_SERVICES: usize = 2048;
pub const MAX_RESOURCE_TYPES: usize = 256;
pub const MAX_UNITS: usize = 4096;
pub const MAX_NEEDS: usize = 8192;
pub const MAX_RULES: usize = 4096;
pub const MAX_BLACKOUTS: usize = 4096;
pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_WAITLIST: usize = 65_536;
pub const MAX_OFFERS: usize = 262_144;

pub const MAX_SERVICES_PER_APPOINTMENT: usize = 12;

/// Availability queries scan at most this many days ahead.
pub const DEFAULT_LOOKAHEAD_DAYS: u32 = 7;

pub const MIN_SLOT_MINUTES: i64 = 5;
pub const MAX_SLOT_MINUTES: i64 = 240;
pub const MAX_HORIZON_DAYS: u32 = 365;
pub const MAX_DEPOSIT_HOURS: i64 = 24 * 30;
pub const MAX_CUTOFF_HOURS: i64 = 24 * 30;
pub const MAX_REPROGRAM_LIMIT: u32 = 20;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;
