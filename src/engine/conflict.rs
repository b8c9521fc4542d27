use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;
use super::availability::first_conflict_excluding;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    use crate::limits::*;
    if range.start.year() < MIN_VALID_YEAR || range.end.year() > MAX_VALID_YEAR {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.day_count() > MAX_RENTAL_DAYS {
        return Err(EngineError::LimitExceeded("rental too long"));
    }
    Ok(())
}

pub(crate) fn validate_window(window: &DateRange) -> Result<(), EngineError> {
    if window.day_count() > crate::limits::MAX_CALENDAR_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("calendar window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_customer(customer: &Customer, notes: Option<&str>) -> Result<(), EngineError> {
    use crate::limits::*;
    if customer.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    if customer.email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("customer email too long"));
    }
    if customer.phone.as_ref().is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::LimitExceeded("customer phone too long"));
    }
    validate_note(notes)
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<(), EngineError> {
    if note.is_some_and(|n| n.len() > crate::limits::MAX_NOTE_LEN) {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

pub(crate) fn check_floor(range: &DateRange, min_date: NaiveDate) -> Result<(), EngineError> {
    if range.start < min_date {
        return Err(EngineError::BeforeMinDate {
            start: range.start,
            min_date,
        });
    }
    Ok(())
}

/// Re-check bookability against the vehicle's current reservations.
/// Caller holds the vehicle's write lock, so nothing can slip in between
/// this check and the WAL append that follows it.
pub(crate) fn check_no_conflict(
    vs: &VehicleState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict_excluding(range, vs.starting_by(range.end), exclude) {
        Some(r) => {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
            Err(EngineError::Conflict {
                reservation_id: r.id,
                range: r.range,
            })
        }
        None => Ok(()),
    }
}

/// Per-vehicle cap. Only pending and confirmed reservations count: closed
/// ones stay on the vehicle for its calendar but never block a new booking.
pub(crate) fn check_capacity(vs: &VehicleState) -> Result<(), EngineError> {
    if vs.active_count() >= crate::limits::MAX_RESERVATIONS_PER_VEHICLE {
        return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use rust_decimal::Decimal;

    use super::*;
    use crate::engine::PricingResult;
    use crate::limits::MAX_RESERVATIONS_PER_VEHICLE;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    fn res(vs: &mut VehicleState, a: &str, b: &str, status: ReservationStatus) -> Ulid {
        let r = Reservation {
            id: Ulid::new(),
            vehicle_id: vs.id,
            range: range(a, b),
            status,
            customer: Customer {
                name: "Grace".into(),
                email: "grace@example.com".into(),
                phone: None,
            },
            notes: None,
            daily_rate: Decimal::from(50),
            extra_charges: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
            pricing: PricingResult::zero(1),
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let id = r.id;
        vs.insert_reservation(r);
        id
    }

    fn vehicle() -> VehicleState {
        VehicleState::new(Ulid::new(), "Polo".into(), Decimal::from(50), VehicleStatus::Available)
    }

    #[test]
    fn conflict_reports_earliest_active_overlap() {
        let mut vs = vehicle();
        res(&mut vs, "2024-03-01", "2024-03-04", ReservationStatus::Cancelled);
        let early = res(&mut vs, "2024-03-03", "2024-03-05", ReservationStatus::Confirmed);
        res(&mut vs, "2024-03-06", "2024-03-08", ReservationStatus::Pending);
        res(&mut vs, "2024-03-20", "2024-03-22", ReservationStatus::Pending);

        match check_no_conflict(&vs, &range("2024-03-02", "2024-03-07"), None) {
            Err(EngineError::Conflict { reservation_id, range: hit }) => {
                assert_eq!(reservation_id, early);
                assert_eq!(hit, range("2024-03-03", "2024-03-05"));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(check_no_conflict(&vs, &range("2024-03-09", "2024-03-19"), None).is_ok());
    }

    #[test]
    fn edited_reservation_is_not_its_own_conflict() {
        let mut vs = vehicle();
        let own = res(&mut vs, "2024-03-10", "2024-03-12", ReservationStatus::Confirmed);
        let next = res(&mut vs, "2024-03-15", "2024-03-16", ReservationStatus::Pending);

        assert!(check_no_conflict(&vs, &range("2024-03-11", "2024-03-14"), Some(own)).is_ok());
        match check_no_conflict(&vs, &range("2024-03-11", "2024-03-15"), Some(own)) {
            Err(EngineError::Conflict { reservation_id, .. }) => assert_eq!(reservation_id, next),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn write_path_agrees_with_availability_checker() {
        let mut vs = vehicle();
        res(&mut vs, "2024-03-01", "2024-03-01", ReservationStatus::Pending);
        res(&mut vs, "2024-03-05", "2024-03-09", ReservationStatus::Completed);
        res(&mut vs, "2024-03-08", "2024-03-10", ReservationStatus::Confirmed);

        let mut start = d("2024-02-25");
        while start <= d("2024-03-12") {
            let candidate = DateRange::new(start, start + chrono::Days::new(2)).unwrap();
            let bookable = super::super::is_range_bookable(
                candidate.start,
                candidate.end,
                &vs.reservations,
                d("2024-01-01"),
            )
            .unwrap();
            assert_eq!(check_no_conflict(&vs, &candidate, None).is_ok(), bookable, "{candidate}");
            start = start.succ_opt().unwrap();
        }
    }

    #[test]
    fn closed_reservations_do_not_fill_capacity() {
        let mut vs = vehicle();
        let closed = res(&mut vs, "2024-03-01", "2024-03-02", ReservationStatus::Completed);
        let template = vs.reservation(closed).unwrap().clone();
        vs.reservations = vec![template.clone(); MAX_RESERVATIONS_PER_VEHICLE];
        assert!(check_capacity(&vs).is_ok());

        let open = Reservation {
            status: ReservationStatus::Pending,
            ..template
        };
        vs.reservations = vec![open; MAX_RESERVATIONS_PER_VEHICLE];
        assert!(matches!(check_capacity(&vs), Err(EngineError::LimitExceeded(_))));
    }
}
