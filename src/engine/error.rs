use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::{DateRange, ReservationStatus};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    InvalidDiscount(Decimal),
    InvalidRate(Decimal),
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// Dates already taken; carries the conflicting reservation for display.
    Conflict {
        reservation_id: Ulid,
        range: DateRange,
    },
    BeforeMinDate {
        start: NaiveDate,
        min_date: NaiveDate,
    },
    ReservationClosed(Ulid),
    VehicleBusy(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} is before start {start}")
            }
            EngineError::InvalidDiscount(pct) => {
                write!(f, "invalid discount {pct}%: must be between 0 and 100")
            }
            EngineError::InvalidRate(rate) => {
                write!(f, "invalid daily rate {rate}: must be non-negative")
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::Conflict {
                reservation_id,
                range,
            } => write!(
                f,
                "dates {range} are already booked (reservation {reservation_id})"
            ),
            EngineError::BeforeMinDate { start, min_date } => {
                write!(f, "start date {start} is before the earliest bookable date {min_date}")
            }
            EngineError::ReservationClosed(id) => {
                write!(f, "reservation {id} is completed or cancelled")
            }
            EngineError::VehicleBusy(id) => {
                write!(f, "cannot remove vehicle {id}: has active reservations")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
