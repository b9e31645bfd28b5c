use chrono::NaiveDate;

use crate::model::{ReservationStatus, UnknownStatus, WallTime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    MissingFields(Vec<&'static str>),
    PastDate { date: NaiveDate, start_time: WallTime },
    AreaNotFound(String),
    NoSuitableTable { party_size: u32 },
    AlreadyCancelled(String),
    NoAvailableTable(String),
    InvalidInput(String),
    AreaTableLimitReached { area_id: String, limit: usize },
    ReservationNotFound(String),
    InvalidStatus(String),
    InvalidTransition {
        id: String,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    AlreadyExists(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable name of the error kind, for callers that map kinds to responses.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::MissingFields(_) => "MissingFields",
            EngineError::PastDate { .. } => "PastDate",
            EngineError::AreaNotFound(_) => "AreaNotFound",
            EngineError::NoSuitableTable { .. } => "NoSuitableTable",
            EngineError::AlreadyCancelled(_) => "AlreadyCancelled",
            EngineError::NoAvailableTable(_) => "NoAvailableTable",
            EngineError::InvalidInput(_) => "InvalidInput",
            EngineError::AreaTableLimitReached { .. } => "AreaTableLimitReached",
            EngineError::ReservationNotFound(_) => "ReservationNotFound",
            EngineError::InvalidStatus(_) => "InvalidStatus",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::AlreadyExists(_) => "AlreadyExists",
            EngineError::LimitExceeded(_) => "LimitExceeded",
            EngineError::WalError(_) => "WalError",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::MissingFields(fields) => {
                write!(f, "missing required fields: {}", fields.join(", "))
            }
            EngineError::PastDate { date, start_time } => {
                write!(f, "cannot reserve in the past: {date} {start_time}")
            }
            EngineError::AreaNotFound(id) => write!(f, "area not found: {id}"),
            EngineError::NoSuitableTable { party_size } => {
                write!(f, "no suitable table for a party of {party_size}")
            }
            EngineError::AlreadyCancelled(id) => {
                write!(f, "cannot confirm cancelled reservation {id}")
            }
            EngineError::NoAvailableTable(id) => {
                write!(f, "no available table for reservation {id}")
            }
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::AreaTableLimitReached { area_id, limit } => {
                write!(f, "area {area_id} table limit reached ({limit})")
            }
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::InvalidStatus(s) => write!(f, "invalid status: {s}"),
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "reservation {id} cannot move from {from} to {to}")
            }
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<UnknownStatus> for EngineError {
    fn from(e: UnknownStatus) -> Self {
        EngineError::InvalidStatus(e.0)
    }
}
