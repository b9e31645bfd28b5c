use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::limits::{DEFAULT_DURATION_MINUTES, MINUTES_PER_DAY};

/// Minutes since the start of the reservation's day.
pub type Minutes = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Wall-clock time ──────────────────────────────────────────────

/// A zero-padded `HH:MM` time within the venue's local day.
///
/// Ordering matches the lexicographic order of the `HH:MM` rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallTime(u16);

impl WallTime {
    pub const MIDNIGHT: WallTime = WallTime(0);

    pub fn new(hours: u32, minutes: u32) -> Option<Self> {
        if hours < 24 && minutes < 60 {
            Some(Self((hours * 60 + minutes) as u16))
        } else {
            None
        }
    }

    pub fn hours(self) -> u32 {
        u32::from(self.0) / 60
    }

    pub fn minutes(self) -> u32 {
        u32::from(self.0) % 60
    }

    pub fn minute_of_day(self) -> Minutes {
        Minutes::from(self.0)
    }

    /// Add `minutes` on a 24-hour clock. Crossing midnight wraps back to
    /// `00:00`; the day itself is never tracked. Negative values wind the clock back.
    pub fn add_minutes(self, minutes: i64) -> Self {
        let total = (self.minute_of_day() + minutes).rem_euclid(MINUTES_PER_DAY);
        Self(total as u16)
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hours(), self.minutes())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeParseError(pub String);

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time {:?}, expected HH:MM", self.0)
    }
}

impl std::error::Error for TimeParseError {}

impl FromStr for WallTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || TimeParseError(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(err)?;
        let valid = |part: &str| (1..=2).contains(&part.len()) && part.bytes().all(|b| b.is_ascii_digit());
        if !valid(h) || !valid(m) {
            return Err(err());
        }
        let hours = h.parse().map_err(|_| err())?;
        let minutes = m.parse().map_err(|_| err())?;
        WallTime::new(hours, minutes).ok_or_else(err)
    }
}

impl TryFrom<String> for WallTime {
    type Error = TimeParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<WallTime> for String {
    fn from(t: WallTime) -> Self {
        t.to_string()
    }
}

/// A reservation window: start time plus length in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: WallTime,
    pub duration: u32,
}

impl Slot {
    pub fn new(start: WallTime, duration: u32) -> Self {
        Self { start, duration }
    }

    /// Zero means "unset" and falls back to the default length.
    pub fn effective_duration(&self) -> u32 {
        if self.duration == 0 {
            DEFAULT_DURATION_MINUTES
        } else {
            self.duration
        }
    }

    /// Wall-clock end, wrapped at midnight.
    pub fn end(&self) -> WallTime {
        self.start.add_minutes(i64::from(self.effective_duration()))
    }

    /// Window anchored to the reservation's day. Unlike [`Slot::end`] the end
    /// is not wrapped, so a 23:30 + 90 slot spans `[1410, 1500)`.
    ///
    /// Spans are only compared within one date: the tail past midnight is
    /// invisible to bookings on the next day, so a 00:15 slot there can share
    /// the table with it.
    pub fn span(&self) -> Span {
        let start = self.start.minute_of_day();
        Span::new(start, start + Minutes::from(self.effective_duration()))
    }
}

// ── Venue records ────────────────────────────────────────────────

/// A seating zone with a cap on how many tables it may hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Area {
    pub id: String,
    pub name: String,
    pub max_tables: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Largest party the table seats.
    pub capacity: u32,
    pub area_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown reservation status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReservationStatus::Pending),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "cancelled" => Ok(ReservationStatus::Cancelled),
            _ => Err(UnknownStatus(s.to_string())),
        }
    }
}

/// A booking. `table_id` is set exactly when `status` is `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub name: String,
    pub date: NaiveDate,
    pub start_time: WallTime,
    /// Minutes.
    pub duration: u32,
    pub party_size: u32,
    pub area_id: String,
    pub table_id: Option<String>,
    pub status: ReservationStatus,
    pub notes: String,
}

impl Reservation {
    pub fn slot(&self) -> Slot {
        Slot::new(self.start_time, self.duration)
    }
}

// ── Store filters and patches ────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableFilter {
    pub area_id: Option<String>,
    pub min_capacity: Option<u32>,
}

impl TableFilter {
    pub fn area(area_id: &str) -> Self {
        Self {
            area_id: Some(area_id.to_string()),
            min_capacity: None,
        }
    }

    pub fn matches(&self, table: &Table) -> bool {
        self.area_id.as_ref().is_none_or(|a| *a == table.area_id)
            && self.min_capacity.is_none_or(|c| table.capacity >= c)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub date: Option<NaiveDate>,
    pub area_id: Option<String>,
    pub table_id: Option<String>,
    pub status: Option<ReservationStatus>,
}

impl ReservationFilter {
    pub fn matches(&self, r: &Reservation) -> bool {
        self.date.is_none_or(|d| d == r.date)
            && self.area_id.as_ref().is_none_or(|a| *a == r.area_id)
            && self
                .table_id
                .as_ref()
                .is_none_or(|t| r.table_id.as_ref() == Some(t))
            && self.status.is_none_or(|s| s == r.status)
    }
}

/// Status change applied through the store. Binding and status always move
/// together so the table/status invariant cannot be split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationPatch {
    pub status: ReservationStatus,
    pub table_id: Option<String>,
}

impl ReservationPatch {
    pub fn confirm(table_id: String) -> Self {
        Self {
            status: ReservationStatus::Confirmed,
            table_id: Some(table_id),
        }
    }

    pub fn cancel() -> Self {
        Self {
            status: ReservationStatus::Cancelled,
            table_id: None,
        }
    }

    pub fn apply(&self, r: &mut Reservation) {
        r.status = self.status;
        r.table_id = self.table_id.clone();
    }
}

// ── Operation inputs and results ─────────────────────────────────

/// Raw create input. Required fields are optional here so the engine can
/// report which ones are missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Option<String>,
    pub name: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub party_size: Option<String>,
    pub area_preference: Option<String>,
    pub duration: Option<u32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub party_size: Option<String>,
    pub area_preference: Option<String>,
    pub duration: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRequest {
    pub id: Option<String>,
    pub area_id: String,
    pub kind: String,
    /// `None` when the caller sent something that is not a positive number.
    pub capacity: Option<u32>,
}

/// First free table found by an availability probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableAvailability {
    pub area_id: String,
    pub area_name: String,
    pub table: Table,
}

/// One flat event per mutation. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AreaCreated { area: Area },
    TableAdded { table: Table },
    ReservationCreated { reservation: Reservation },
    ReservationConfirmed { id: String, table_id: String },
    ReservationCancelled { id: String },
}
