use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// What a transition does to the vehicle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleEffect {
    /// Vehicle goes out: status becomes `rented`.
    MarkRented,
    /// Vehicle may come back: `available` unless something else holds it.
    Release,
}

/// Look up a move in the transition table.
///
/// `pending -> confirmed -> completed`, `cancelled` from `pending` or
/// `confirmed`. `completed` and `cancelled` are terminal.
pub fn transition_effect(
    from: ReservationStatus,
    to: ReservationStatus,
) -> Result<VehicleEffect, EngineError> {
    use crate::model::ReservationStatus::*;
    match (from, to) {
        (Pending, Confirmed) => Ok(VehicleEffect::MarkRented),
        (Pending, Cancelled) | (Confirmed, Cancelled) => Ok(VehicleEffect::Release),
        (Confirmed, Completed) => Ok(VehicleEffect::Release),
        _ => Err(EngineError::InvalidTransition { from, to }),
    }
}

pub fn can_transition(from: ReservationStatus, to: ReservationStatus) -> bool {
    transition_effect(from, to).is_ok()
}

/// New vehicle status for a transition, or `None` to leave it untouched.
///
/// A release only flips `rented`/`reserved` back to `available`, and only
/// when no other confirmed reservation covers `today`. A vehicle in
/// maintenance stays there.
pub fn resolve_vehicle_status(
    effect: VehicleEffect,
    vehicle: &VehicleState,
    reservation_id: Ulid,
    today: NaiveDate,
) -> Option<VehicleStatus> {
    match effect {
        VehicleEffect::MarkRented => {
            (vehicle.status != VehicleStatus::Rented).then_some(VehicleStatus::Rented)
        }
        VehicleEffect::Release => {
            if !matches!(vehicle.status, VehicleStatus::Rented | VehicleStatus::Reserved) {
                return None;
            }
            let still_out = vehicle.reservations.iter().any(|r| {
                r.id != reservation_id
                    && r.status == ReservationStatus::Confirmed
                    && r.range.contains(today)
            });
            (!still_out).then_some(VehicleStatus::Available)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::engine::PricingResult;
    use crate::model::ReservationStatus::*;

    const ALL: [ReservationStatus; 4] = [Pending, Confirmed, Completed, Cancelled];

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn res(a: &str, b: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            vehicle_id: Ulid::nil(),
            range: DateRange::new(d(a), d(b)).unwrap(),
            status,
            customer: Customer {
                name: "Linus".into(),
                email: "linus@example.com".into(),
                phone: Some("555-0100".into()),
            },
            notes: None,
            daily_rate: Decimal::from(70),
            extra_charges: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
            pricing: PricingResult::zero(1),
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    fn vehicle(status: VehicleStatus, reservations: Vec<Reservation>) -> VehicleState {
        let mut vs = VehicleState::new(Ulid::new(), "Corolla".into(), Decimal::from(70), status);
        for r in reservations {
            vs.insert_reservation(r);
        }
        vs
    }

    #[test]
    fn table_allows_exactly_four_moves() {
        let allowed: Vec<_> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| can_transition(from, to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (Pending, Confirmed),
                (Pending, Cancelled),
                (Confirmed, Completed),
                (Confirmed, Cancelled),
            ]
        );
    }

    #[test]
    fn terminal_states_have_no_exit() {
        for to in ALL {
            assert!(!can_transition(Completed, to));
            assert!(!can_transition(Cancelled, to));
        }
    }

    #[test]
    fn pending_cannot_complete() {
        let err = transition_effect(Pending, Completed).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { from: Pending, to: Completed }
        ));
    }

    #[test]
    fn confirm_marks_rented() {
        let vs = vehicle(VehicleStatus::Available, vec![]);
        let status = resolve_vehicle_status(VehicleEffect::MarkRented, &vs, Ulid::new(), d("2024-07-01"));
        assert_eq!(status, Some(VehicleStatus::Rented));
    }

    #[test]
    fn release_reverts_when_idle() {
        let r = res("2024-07-01", "2024-07-05", Confirmed);
        let id = r.id;
        let vs = vehicle(VehicleStatus::Rented, vec![r]);
        let status = resolve_vehicle_status(VehicleEffect::Release, &vs, id, d("2024-07-03"));
        assert_eq!(status, Some(VehicleStatus::Available));
    }

    #[test]
    fn release_keeps_rented_when_another_rental_is_out() {
        let closing = res("2024-06-25", "2024-07-01", Confirmed);
        let other = res("2024-07-02", "2024-07-06", Confirmed);
        let id = closing.id;
        let vs = vehicle(VehicleStatus::Rented, vec![closing, other]);
        let status = resolve_vehicle_status(VehicleEffect::Release, &vs, id, d("2024-07-03"));
        assert_eq!(status, None);
    }

    #[test]
    fn pending_neighbour_does_not_hold_vehicle() {
        let closing = res("2024-07-01", "2024-07-05", Confirmed);
        let other = res("2024-07-02", "2024-07-06", Pending);
        let id = closing.id;
        let vs = vehicle(VehicleStatus::Rented, vec![closing, other]);
        let status = resolve_vehicle_status(VehicleEffect::Release, &vs, id, d("2024-07-03"));
        assert_eq!(status, Some(VehicleStatus::Available));
    }

    #[test]
    fn release_leaves_maintenance_alone() {
        let r = res("2024-07-01", "2024-07-05", Pending);
        let id = r.id;
        let vs = vehicle(VehicleStatus::Maintenance, vec![r]);
        assert_eq!(resolve_vehicle_status(VehicleEffect::Release, &vs, id, d("2024-07-03")), None);
    }
}
