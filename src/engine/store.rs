use async_trait::async_trait;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

/// Field a reservation lookup filters on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationField {
    Id(Ulid),
    VehicleId(Ulid),
    Status(ReservationStatus),
    CustomerEmail(String),
}

/// Partial update of a reservation. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ReservationPatch {
    pub range: Option<DateRange>,
    pub extra_charges: Option<Decimal>,
    pub discount_percent: Option<Decimal>,
    pub status: Option<ReservationStatus>,
    /// Recorded on the history entry when `status` changes.
    pub note: Option<String>,
}

impl ReservationPatch {
    pub fn status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn range(range: DateRange) -> Self {
        Self {
            range: Some(range),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_none()
            && self.extra_charges.is_none()
            && self.discount_percent.is_none()
            && self.status.is_none()
    }
}

/// The persistence operations booking surfaces rely on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn query_by_field(&self, field: ReservationField) -> Result<Vec<Reservation>, EngineError>;

    /// Reservations of any status on `vehicle_id` whose dates touch `range`.
    async fn query_range_overlap(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Reservation>, EngineError>;

    async fn insert(&self, request: NewReservation) -> Result<Reservation, EngineError>;

    /// Apply a patch as one commit: new dates and pricing are checked, the
    /// status move is checked against the current status, and either all of
    /// it is stored or none of it is.
    async fn update(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, EngineError>;
}

#[async_trait]
impl RecordStore for Engine {
    async fn query_by_field(&self, field: ReservationField) -> Result<Vec<Reservation>, EngineError> {
        match field {
            ReservationField::Id(id) => match self.get_reservation(id).await {
                Ok(r) => Ok(vec![r]),
                Err(EngineError::NotFound(_)) => Ok(vec![]),
                Err(e) => Err(e),
            },
            ReservationField::VehicleId(vehicle_id) => Ok(self.reservations_for_vehicle(vehicle_id).await),
            ReservationField::Status(status) => Ok(self.reservations_by_status(status).await),
            ReservationField::CustomerEmail(email) => {
                let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
                let mut out = Vec::new();
                for vs in handles {
                    let guard = vs.read().await;
                    out.extend(
                        guard
                            .reservations
                            .iter()
                            .filter(|r| r.customer.email.eq_ignore_ascii_case(&email))
                            .cloned(),
                    );
                }
                out.sort_by(|a, b| a.range.start.cmp(&b.range.start).then(a.id.cmp(&b.id)));
                Ok(out)
            }
        }
    }

    async fn query_range_overlap(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
    ) -> Result<Vec<Reservation>, EngineError> {
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        Ok(guard.overlapping(&range).cloned().collect())
    }

    async fn insert(&self, request: NewReservation) -> Result<Reservation, EngineError> {
        let today = self.clock.today();
        self.create_reservation(request, today).await
    }

    async fn update(&self, id: Ulid, patch: ReservationPatch) -> Result<Reservation, EngineError> {
        let floor = self.clock.yesterday();
        self.amend_reservation(id, patch, floor).await
    }
}
