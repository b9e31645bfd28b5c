//! Hard input limits and fixed venue rules enforced by the engine.

/// Reservation length used when the caller gives none (or zero).
pub const DEFAULT_DURATION_MINUTES: u32 = 90;

pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// Area preference meaning "try every area in storage order".
pub const ANY_AREA: &str = "any";

/// The VIP area never holds more than [`VIP_MAX_TABLES`], whatever its `max_tables` says.
pub const VIP_AREA_ID: &str = "vip";
pub const VIP_MAX_TABLES: usize = 3;

pub const MAX_AREAS: usize = 256;
pub const MAX_TABLES_PER_AREA: u32 = 1_000;
pub const MAX_TABLE_CAPACITY: u32 = 500;
pub const MAX_PARTY_SIZE: u32 = 500;
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_ID_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_048;
