use chrono::{NaiveDate, NaiveDateTime};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Half-open overlap test between two reservation windows. Windows that
/// only touch at a boundary do not overlap.
pub fn overlaps(a: &Slot, b: &Slot) -> bool {
    a.span().overlaps(&b.span())
}

/// First confirmed reservation bound to `table_id` whose window collides with
/// `slot`. `booked` is the date-filtered candidate set from the store;
/// `exclude` skips the reservation being placed.
pub(crate) fn find_conflict<'a>(
    booked: &'a [Reservation],
    table_id: &str,
    slot: &Slot,
    exclude: Option<&str>,
) -> Option<&'a Reservation> {
    booked.iter().find(|r| {
        r.status == ReservationStatus::Confirmed
            && r.table_id.as_deref() == Some(table_id)
            && exclude != Some(r.id.as_str())
            && overlaps(&r.slot(), slot)
    })
}

/// Build a `MissingFields` error naming every absent field, in declaration order.
pub(crate) fn missing_fields(fields: &[(&'static str, bool)]) -> EngineError {
    EngineError::MissingFields(
        fields
            .iter()
            .filter(|(_, present)| !present)
            .map(|(name, _)| *name)
            .collect(),
    )
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::InvalidInput(format!("invalid date {s:?}, expected YYYY-MM-DD")))
}

pub(crate) fn parse_time(s: &str) -> Result<WallTime, EngineError> {
    s.parse()
        .map_err(|e: TimeParseError| EngineError::InvalidInput(e.to_string()))
}

pub(crate) fn check_not_past(
    date: NaiveDate,
    start_time: WallTime,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let at = date
        .and_hms_opt(start_time.hours(), start_time.minutes(), 0)
        .ok_or_else(|| EngineError::InvalidInput(format!("invalid start {date} {start_time}")))?;
    if at < now {
        return Err(EngineError::PastDate { date, start_time });
    }
    Ok(())
}

pub(crate) fn validate_duration(duration: Option<u32>) -> Result<u32, EngineError> {
    match duration {
        None | Some(0) => Ok(DEFAULT_DURATION_MINUTES),
        Some(d) if d > MAX_DURATION_MINUTES => Err(EngineError::LimitExceeded("duration too long")),
        Some(d) => Ok(d),
    }
}

/// A positive count from raw text. Blank and zero read as absent; anything
/// else that is not a non-negative integer is `InvalidInput`.
pub(crate) fn parse_count(field: &str, raw: Option<&str>) -> Result<Option<u32>, EngineError> {
    let Some(text) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    match text.parse::<u32>() {
        Ok(0) => Ok(None),
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(EngineError::InvalidInput(format!(
            "{field} must be a positive integer, got {text:?}"
        ))),
    }
}

pub(crate) fn validate_party_size(party_size: u32) -> Result<(), EngineError> {
    if party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    Ok(())
}

pub(crate) fn validate_id(id: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::InvalidInput("empty id".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("id too long"));
    }
    Ok(())
}

/// Non-blank trimmed text, or `None`.
pub(crate) fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
