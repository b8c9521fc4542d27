use chrono::NaiveDate;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::availability::{DayOccupancy, free_ranges, is_range_bookable, occupied_days};
use super::conflict::{validate_range, validate_window};
use super::pricing::{PricingInput, PricingResult, calculate_price};
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_vehicle(&self, id: Ulid) -> Result<VehicleInfo, EngineError> {
        let vs = self.get_vehicle_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        Ok(vehicle_info(&guard))
    }

    pub async fn list_vehicles(&self) -> Vec<VehicleInfo> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for vs in handles {
            out.push(vehicle_info(&*vs.read().await));
        }
        out.sort_by_key(|v| v.id);
        out
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let vehicle_id = self
            .get_vehicle_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = vs.read().await;
        guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// All reservations on a vehicle ordered by start date, any status.
    /// Unknown vehicles have none.
    pub async fn reservations_for_vehicle(&self, vehicle_id: Ulid) -> Vec<Reservation> {
        match self.get_vehicle_state(&vehicle_id) {
            Some(vs) => vs.read().await.reservations.clone(),
            None => vec![],
        }
    }

    pub async fn reservations_by_status(&self, status: ReservationStatus) -> Vec<Reservation> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for vs in handles {
            let guard = vs.read().await;
            out.extend(guard.reservations.iter().filter(|r| r.status == status).cloned());
        }
        out.sort_by(|a, b| a.range.start.cmp(&b.range.start).then(a.id.cmp(&b.id)));
        out
    }

    /// Transition log for a reservation, oldest first. Survives deletion.
    pub fn history(&self, reservation_id: Ulid) -> Vec<HistoryEntry> {
        self.history.entries_for(&reservation_id)
    }

    /// Read-only bookability check. Advisory: `create_reservation` repeats
    /// it under the vehicle lock.
    pub async fn check_availability(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
        min_date: NaiveDate,
    ) -> Result<bool, EngineError> {
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let candidates: Vec<Reservation> = guard.overlapping(&range).cloned().collect();
        is_range_bookable(range.start, range.end, &candidates, min_date)
    }

    /// One entry per day of `window` naming the reservation that holds it.
    pub async fn vehicle_occupancy(
        &self,
        vehicle_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<DayOccupancy>, EngineError> {
        validate_window(&window)?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let in_window: Vec<Reservation> = guard.overlapping(&window).cloned().collect();
        Ok(occupied_days(&window, &in_window))
    }

    /// Bookable stretches of `window`.
    pub async fn vehicle_free_ranges(
        &self,
        vehicle_id: Ulid,
        window: DateRange,
    ) -> Result<Vec<DateRange>, EngineError> {
        validate_window(&window)?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let guard = vs.read().await;
        let in_window: Vec<Reservation> = guard.overlapping(&window).cloned().collect();
        Ok(free_ranges(&window, &in_window))
    }

    /// Price preview at the vehicle's current rate. Nothing is stored.
    pub async fn quote(
        &self,
        vehicle_id: Ulid,
        range: DateRange,
        extra_charges: Decimal,
        discount_percent: Decimal,
    ) -> Result<PricingResult, EngineError> {
        validate_range(&range)?;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let daily_rate = vs.read().await.daily_rate;
        calculate_price(
            &PricingInput::new(daily_rate, range.start, range.end)
                .with_extras(extra_charges)
                .with_discount(discount_percent),
        )
    }
}

fn vehicle_info(vs: &VehicleState) -> VehicleInfo {
    VehicleInfo {
        id: vs.id,
        name: vs.name.clone(),
        daily_rate: vs.daily_rate,
        status: vs.status,
        active_reservations: vs.active_count(),
    }
}
