use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{EngineError, PricingResult};

/// Inclusive calendar range `[start, end]`. Time of day is never significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end < start {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// A one-day range.
    pub fn single(date: NaiveDate) -> Self {
        Self { start: date, end: date }
    }

    /// Number of calendar days covered, counting both ends.
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn contains_range(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Every date in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Drop the time component of a timestamp supplied by a form or API route.
pub fn normalize_date(ts: &DateTime<Utc>) -> NaiveDate {
    ts.date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Active reservations occupy their dates.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "completed" => Some(ReservationStatus::Completed),
            "cancelled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Available,
    Rented,
    Maintenance,
    Reserved,
}

impl VehicleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VehicleStatus::Available => "available",
            VehicleStatus::Rented => "rented",
            VehicleStatus::Maintenance => "maintenance",
            VehicleStatus::Reserved => "reserved",
        }
    }
}

impl fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// One vehicle-date-range occupancy with its lifecycle status and the price
/// computed for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub customer: Customer,
    pub notes: Option<String>,
    /// Rate captured when the reservation was made.
    pub daily_rate: Decimal,
    pub extra_charges: Decimal,
    pub discount_percent: Decimal,
    pub pricing: PricingResult,
    pub created_at: DateTime<Utc>,
}

/// Payload for a new reservation. The engine assigns id, status and price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub vehicle_id: Ulid,
    pub range: DateRange,
    pub customer: Customer,
    pub notes: Option<String>,
    pub extra_charges: Decimal,
    pub discount_percent: Decimal,
}

impl NewReservation {
    pub fn new(vehicle_id: Ulid, range: DateRange, customer: Customer) -> Self {
        Self {
            vehicle_id,
            range,
            customer,
            notes: None,
            extra_charges: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
        }
    }
}

/// Immutable audit record appended on every lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub reservation_id: Ulid,
    pub new_status: ReservationStatus,
    pub timestamp: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VehicleState {
    pub id: Ulid,
    pub name: String,
    pub daily_rate: Decimal,
    pub status: VehicleStatus,
    /// All reservations of this vehicle (any status), sorted by `range.start`.
    pub reservations: Vec<Reservation>,
}

impl VehicleState {
    pub fn new(id: Ulid, name: String, daily_rate: Decimal, status: VehicleStatus) -> Self {
        Self {
            id,
            name,
            daily_rate,
            status,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by start date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.range.start <= reservation.range.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations starting on or before `date`.
    pub fn starting_by(&self, date: NaiveDate) -> &[Reservation] {
        let right_bound = self.reservations.partition_point(|r| r.range.start <= date);
        &self.reservations[..right_bound]
    }

    /// Reservations (any status) whose range overlaps `query`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Reservation> {
        self.starting_by(query.end)
            .iter()
            .filter(move |r| r.range.end >= query.start)
    }

    pub fn active_count(&self) -> usize {
        self.reservations.iter().filter(|r| r.status.is_active()).count()
    }
}

/// WAL record format. Each variant is one atomic commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered {
        id: Ulid,
        name: String,
        daily_rate: Decimal,
        status: VehicleStatus,
    },
    VehicleUpdated {
        id: Ulid,
        name: String,
        daily_rate: Decimal,
        status: VehicleStatus,
    },
    VehicleRemoved {
        id: Ulid,
    },
    /// Insert plus the initial `pending` history entry.
    ReservationCreated {
        reservation: Reservation,
        history: HistoryEntry,
    },
    ReservationRescheduled {
        id: Ulid,
        vehicle_id: Ulid,
        range: DateRange,
        pricing: PricingResult,
    },
    ReservationRepriced {
        id: Ulid,
        vehicle_id: Ulid,
        extra_charges: Decimal,
        discount_percent: Decimal,
        pricing: PricingResult,
    },
    /// Patch of dates, pricing and status committed as one record.
    ReservationAmended {
        id: Ulid,
        vehicle_id: Ulid,
        range: DateRange,
        extra_charges: Decimal,
        discount_percent: Decimal,
        pricing: PricingResult,
        history: Option<HistoryEntry>,
        vehicle_status: Option<VehicleStatus>,
    },
    /// Status update, history append and vehicle status update together.
    StatusChanged {
        id: Ulid,
        vehicle_id: Ulid,
        history: HistoryEntry,
        vehicle_status: Option<VehicleStatus>,
    },
    ReservationDeleted {
        id: Ulid,
        vehicle_id: Ulid,
    },
    /// Compaction only: a reservation without a history append.
    ReservationRestored {
        reservation: Reservation,
    },
    /// Compaction only: previously appended history entries.
    HistoryRestored {
        entries: Vec<HistoryEntry>,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInfo {
    pub id: Ulid,
    pub name: String,
    pub daily_rate: Decimal,
    pub status: VehicleStatus,
    pub active_reservations: usize,
}
