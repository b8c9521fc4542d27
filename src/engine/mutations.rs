use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_capacity, check_floor, check_no_conflict, validate_customer, validate_note, validate_range,
};
use super::lifecycle::{resolve_vehicle_status, transition_effect};
use super::pricing::{PricingInput, PricingResult, calculate_price};
use super::store::ReservationPatch;
use super::{Engine, EngineError, WalCommand};

fn validate_vehicle(name: &str, daily_rate: Decimal) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("vehicle name too long"));
    }
    if daily_rate < Decimal::ZERO {
        return Err(EngineError::InvalidRate(daily_rate));
    }
    Ok(())
}

fn price_for(
    daily_rate: Decimal,
    range: &DateRange,
    extra_charges: Decimal,
    discount_percent: Decimal,
) -> Result<PricingResult, EngineError> {
    calculate_price(
        &PricingInput::new(daily_rate, range.start, range.end)
            .with_extras(extra_charges)
            .with_discount(discount_percent),
    )
}

impl Engine {
    pub async fn register_vehicle(
        &self,
        id: Ulid,
        name: String,
        daily_rate: Decimal,
        status: VehicleStatus,
    ) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;
        if self.state.len() >= MAX_VEHICLES {
            return Err(EngineError::LimitExceeded("too many vehicles"));
        }
        validate_vehicle(&name, daily_rate)?;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::VehicleRegistered { id, name: name.clone(), daily_rate, status };
        self.wal_append(&event).await?;
        let vs = VehicleState::new(id, name, daily_rate, status);
        self.state.insert(id, Arc::new(RwLock::new(vs)));
        self.notify.send(id, &event);
        info!("registered vehicle {id}");
        Ok(())
    }

    /// Admin edit of name, rate or status. Existing reservations keep the
    /// rate they were priced with.
    pub async fn update_vehicle(
        &self,
        id: Ulid,
        name: String,
        daily_rate: Decimal,
        status: VehicleStatus,
    ) -> Result<(), EngineError> {
        validate_vehicle(&name, daily_rate)?;
        let _commit = self.commit_gate.read().await;
        let vs = self
            .get_vehicle_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let mut guard = vs.write().await;

        let event = Event::VehicleUpdated { id, name, daily_rate, status };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Remove a vehicle with no pending or confirmed reservations.
    pub async fn remove_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let _commit = self.commit_gate.read().await;
        let vs = self
            .get_vehicle_state(&id)
            .ok_or(EngineError::NotFound(id))?;
        let guard = vs.write().await;
        if guard.active_count() > 0 {
            return Err(EngineError::VehicleBusy(id));
        }

        let event = Event::VehicleRemoved { id };
        self.wal_append(&event).await?;
        for r in &guard.reservations {
            self.reservation_to_vehicle.remove(&r.id);
        }
        self.state.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!("removed vehicle {id}");
        Ok(())
    }

    /// Price and insert a `pending` reservation.
    ///
    /// Bookability is re-checked under the vehicle's write lock, so of two
    /// concurrent requests for overlapping dates exactly one succeeds and the
    /// other gets `Conflict`.
    pub async fn create_reservation(
        &self,
        request: NewReservation,
        min_date: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        validate_range(&request.range)?;
        validate_customer(&request.customer, request.notes.as_deref())?;
        let vehicle_id = request.vehicle_id;
        let _commit = self.commit_gate.read().await;
        let vs = self
            .get_vehicle_state(&vehicle_id)
            .ok_or(EngineError::NotFound(vehicle_id))?;
        let mut guard = vs.write().await;
        check_capacity(&guard)?;

        check_floor(&request.range, min_date)?;
        if let Err(e) = check_no_conflict(&guard, &request.range, None) {
            warn!("booking {} on vehicle {vehicle_id} rejected: {e}", request.range);
            return Err(e);
        }
        let pricing = price_for(
            guard.daily_rate,
            &request.range,
            request.extra_charges,
            request.discount_percent,
        )?;

        let now = self.clock.now();
        let reservation = Reservation {
            id: Ulid::new(),
            vehicle_id,
            range: request.range,
            status: ReservationStatus::Pending,
            customer: request.customer,
            notes: request.notes,
            daily_rate: guard.daily_rate,
            extra_charges: request.extra_charges,
            discount_percent: request.discount_percent,
            pricing,
            created_at: now,
        };
        let history = HistoryEntry {
            reservation_id: reservation.id,
            new_status: ReservationStatus::Pending,
            timestamp: now,
            note: None,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            history,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} created on vehicle {vehicle_id} for {}, total {}",
            reservation.id, reservation.range, reservation.pricing.total
        );
        Ok(reservation)
    }

    /// Move an active reservation to new dates. The reservation itself never
    /// counts as a conflict. Price is recomputed with the rate it was booked at.
    /// `min_date` only applies when the start date changes.
    pub async fn reschedule_reservation(
        &self,
        id: Ulid,
        range: DateRange,
        min_date: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        validate_range(&range)?;
        let _commit = self.commit_gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?.clone();
        if !current.status.is_active() {
            return Err(EngineError::ReservationClosed(id));
        }

        // A rental already under way may still have its end moved.
        if range.start != current.range.start {
            check_floor(&range, min_date)?;
        }
        check_no_conflict(&guard, &range, Some(id))?;
        let pricing = price_for(
            current.daily_rate,
            &range,
            current.extra_charges,
            current.discount_percent,
        )?;

        let event = Event::ReservationRescheduled { id, vehicle_id, range, pricing };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        info!("reservation {id} moved from {} to {range}", current.range);
        Ok(Reservation { range, pricing, ..current })
    }

    /// Change extras or discount on an active reservation and reprice it.
    pub async fn reprice_reservation(
        &self,
        id: Ulid,
        extra_charges: Decimal,
        discount_percent: Decimal,
    ) -> Result<Reservation, EngineError> {
        let _commit = self.commit_gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?.clone();
        if !current.status.is_active() {
            return Err(EngineError::ReservationClosed(id));
        }
        let pricing = price_for(current.daily_rate, &current.range, extra_charges, discount_percent)?;

        let event = Event::ReservationRepriced {
            id,
            vehicle_id,
            extra_charges,
            discount_percent,
            pricing,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        Ok(Reservation {
            extra_charges,
            discount_percent,
            pricing,
            ..current
        })
    }

    /// Move a reservation through its lifecycle.
    ///
    /// The status change, the history entry and the vehicle status update
    /// are a single WAL record: either all of them persist or none do. An
    /// illegal move fails with `InvalidTransition` before anything is written.
    pub async fn transition(
        &self,
        reservation_id: Ulid,
        new_status: ReservationStatus,
        note: Option<String>,
    ) -> Result<Reservation, EngineError> {
        validate_note(note.as_deref())?;
        let _commit = self.commit_gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&reservation_id).await?;
        let current = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))?
            .clone();

        let effect = transition_effect(current.status, new_status)?;
        let now = self.clock.now();
        let vehicle_status = resolve_vehicle_status(effect, &guard, reservation_id, now.date_naive());

        let event = Event::StatusChanged {
            id: reservation_id,
            vehicle_id,
            history: HistoryEntry {
                reservation_id,
                new_status,
                timestamp: now,
                note,
            },
            vehicle_status,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        metrics::counter!(
            crate::observability::TRANSITIONS_TOTAL,
            "status" => crate::observability::status_label(new_status)
        )
        .increment(1);
        info!(
            "reservation {reservation_id}: {} -> {new_status}{}",
            current.status,
            vehicle_status.map_or(String::new(), |s| format!(", vehicle {vehicle_id} now {s}"))
        );
        Ok(Reservation {
            status: new_status,
            ..current
        })
    }

    /// Apply dates, pricing and status from `patch` as a single WAL record.
    ///
    /// Every part is checked against the reservation as it stands before
    /// anything is written, so a rejected patch changes nothing. Pricing is
    /// recomputed over the new dates with the booked rate.
    pub async fn amend_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        min_date: NaiveDate,
    ) -> Result<Reservation, EngineError> {
        validate_note(patch.note.as_deref())?;
        if let Some(range) = &patch.range {
            validate_range(range)?;
        }
        let _commit = self.commit_gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.reservation(id).ok_or(EngineError::NotFound(id))?.clone();

        let range = patch.range.unwrap_or(current.range);
        let extra_charges = patch.extra_charges.unwrap_or(current.extra_charges);
        let discount_percent = patch.discount_percent.unwrap_or(current.discount_percent);
        let new_status = patch.status.filter(|s| *s != current.status);
        let moved = range != current.range;
        let repriced = moved
            || extra_charges != current.extra_charges
            || discount_percent != current.discount_percent;
        if !repriced && new_status.is_none() {
            return Ok(current);
        }

        let effect = new_status
            .map(|status| transition_effect(current.status, status))
            .transpose()?;
        if repriced && !current.status.is_active() {
            return Err(EngineError::ReservationClosed(id));
        }
        if moved {
            if range.start != current.range.start {
                check_floor(&range, min_date)?;
            }
            check_no_conflict(&guard, &range, Some(id))?;
        }
        let pricing = if repriced {
            price_for(current.daily_rate, &range, extra_charges, discount_percent)?
        } else {
            current.pricing
        };

        let now = self.clock.now();
        let (history, vehicle_status) = match (new_status, effect) {
            (Some(status), Some(effect)) => (
                Some(HistoryEntry {
                    reservation_id: id,
                    new_status: status,
                    timestamp: now,
                    note: patch.note,
                }),
                resolve_vehicle_status(effect, &guard, id, now.date_naive()),
            ),
            _ => (None, None),
        };

        let event = Event::ReservationAmended {
            id,
            vehicle_id,
            range,
            extra_charges,
            discount_percent,
            pricing,
            history,
            vehicle_status,
        };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;

        let status = new_status.unwrap_or(current.status);
        if new_status.is_some() {
            metrics::counter!(
                crate::observability::TRANSITIONS_TOTAL,
                "status" => crate::observability::status_label(status)
            )
            .increment(1);
        }
        info!("reservation {id} amended: {range}, {status}, total {}", pricing.total);
        Ok(Reservation {
            range,
            status,
            extra_charges,
            discount_percent,
            pricing,
            ..current
        })
    }

    /// Admin removal of an erroneous record. History is kept.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let _commit = self.commit_gate.read().await;
        let (vehicle_id, mut guard) = self.resolve_reservation_write(&id).await?;
        if guard.reservation(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationDeleted { id, vehicle_id };
        self.persist_and_apply(vehicle_id, &mut guard, &event).await?;
        warn!("reservation {id} deleted from vehicle {vehicle_id}");
        Ok(vehicle_id)
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. History is carried over in full.
    ///
    /// Holds the commit gate exclusively from the first snapshot read until
    /// the new file is in place: a write committed in between would land in
    /// the old log and vanish with the rename.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;
        let mut events = Vec::new();

        let vehicle_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in vehicle_ids {
            let Some(vs) = self.get_vehicle_state(&id) else { continue };
            let guard = vs.read().await;
            events.push(Event::VehicleRegistered {
                id: guard.id,
                name: guard.name.clone(),
                daily_rate: guard.daily_rate,
                status: guard.status,
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationRestored {
                    reservation: reservation.clone(),
                });
            }
        }
        let entries = self.history.snapshot();
        if !entries.is_empty() {
            events.push(Event::HistoryRestored { entries });
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
