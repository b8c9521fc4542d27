use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Availability checks ───────────────────────────────────────────

/// Calendar verdict for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOccupancy {
    pub date: NaiveDate,
    /// Reservation occupying the day, if any.
    pub reservation_id: Option<Ulid>,
}

impl DayOccupancy {
    pub fn is_occupied(&self) -> bool {
        self.reservation_id.is_some()
    }
}

fn active(reservations: &[Reservation]) -> impl Iterator<Item = &Reservation> {
    reservations.iter().filter(|r| r.status.is_active())
}

/// True iff an active (pending or confirmed) reservation covers `date`.
/// Completed and cancelled reservations are ignored regardless of what the
/// caller passes in.
pub fn is_date_occupied(date: NaiveDate, reservations: &[Reservation]) -> bool {
    active(reservations).any(|r| r.range.contains(date))
}

/// True iff `[candidate_start, candidate_end]` starts on or after `min_date`
/// and no day in it is occupied.
///
/// The reservation being edited must be excluded by the caller.
pub fn is_range_bookable(
    candidate_start: NaiveDate,
    candidate_end: NaiveDate,
    reservations: &[Reservation],
    min_date: NaiveDate,
) -> Result<bool, EngineError> {
    let candidate = DateRange::new(candidate_start, candidate_end)?;
    if candidate.start < min_date {
        return Ok(false);
    }
    Ok(first_conflict(&candidate, reservations).is_none())
}

/// Earliest-starting active reservation overlapping `candidate`.
pub fn first_conflict<'a>(
    candidate: &DateRange,
    reservations: &'a [Reservation],
) -> Option<&'a Reservation> {
    first_conflict_excluding(candidate, reservations, None)
}

/// [`first_conflict`] that skips `exclude`, the reservation being edited.
pub fn first_conflict_excluding<'a>(
    candidate: &DateRange,
    reservations: &'a [Reservation],
    exclude: Option<Ulid>,
) -> Option<&'a Reservation> {
    active(reservations)
        .filter(|r| Some(r.id) != exclude && r.range.overlaps(candidate))
        .min_by_key(|r| r.range.start)
}

/// Per-day verdicts across `window`, for calendar rendering.
pub fn occupied_days(window: &DateRange, reservations: &[Reservation]) -> Vec<DayOccupancy> {
    let relevant: Vec<&Reservation> = active(reservations)
        .filter(|r| r.range.overlaps(window))
        .collect();
    window
        .days()
        .map(|date| DayOccupancy {
            date,
            reservation_id: relevant
                .iter()
                .find(|r| r.range.contains(date))
                .map(|r| r.id),
        })
        .collect()
}

/// Active ranges merged into disjoint blocks, sorted by start.
pub fn blocked_ranges(reservations: &[Reservation]) -> Vec<DateRange> {
    let mut ranges: Vec<DateRange> = active(reservations).map(|r| r.range).collect();
    ranges.sort_by_key(|r| r.start);
    merge_ranges(&ranges)
}

/// Sub-ranges of `window` no active reservation touches.
pub fn free_ranges(window: &DateRange, reservations: &[Reservation]) -> Vec<DateRange> {
    subtract_ranges(&[*window], &blocked_ranges(reservations))
}

/// Merge sorted ranges. Overlapping and back-to-back ranges coalesce, since
/// there is no free day between them.
pub fn merge_ranges(sorted: &[DateRange]) -> Vec<DateRange> {
    let mut merged: Vec<DateRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end.succ_opt().unwrap_or(last.end) {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` ranges from sorted, disjoint `base`.
pub fn subtract_ranges(base: &[DateRange], to_remove: &[DateRange]) -> Vec<DateRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        // `None` once the cursor has moved past the last representable day.
        let mut current_start = Some(b.start);
        let current_end = b.end;

        while ri < to_remove.len() && b.start > to_remove[ri].end {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() {
            let Some(start) = current_start else { break };
            let r = &to_remove[j];
            if r.start > current_end {
                break;
            }
            if r.start > start
                && let Some(before) = r.start.pred_opt() {
                    result.push(DateRange { start, end: before });
                }
            if r.end >= start {
                current_start = r.end.succ_opt();
            }
            j += 1;
        }

        if let Some(start) = current_start
            && start <= current_end {
                result.push(DateRange { start, end: current_end });
            }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;

    use super::*;
    use crate::engine::PricingResult;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b)).unwrap()
    }

    fn res(a: &str, b: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            vehicle_id: Ulid::nil(),
            range: range(a, b),
            status,
            customer: Customer {
                name: "Grace".into(),
                email: "grace@example.com".into(),
                phone: None,
            },
            notes: None,
            daily_rate: Decimal::from(60),
            extra_charges: Decimal::ZERO,
            discount_percent: Decimal::ZERO,
            pricing: PricingResult::zero(1),
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        }
    }

    const FLOOR: &str = "2024-01-01";

    // ── is_date_occupied ──────────────────────────────────

    #[test]
    fn occupied_on_both_boundaries() {
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Confirmed)];
        assert!(is_date_occupied(d("2024-07-10"), &list));
        assert!(is_date_occupied(d("2024-07-15"), &list));
        assert!(!is_date_occupied(d("2024-07-09"), &list));
        assert!(!is_date_occupied(d("2024-07-16"), &list));
    }

    #[test]
    fn closed_reservations_never_occupy() {
        let list = vec![
            res("2024-07-10", "2024-07-15", ReservationStatus::Cancelled),
            res("2024-07-01", "2024-07-20", ReservationStatus::Completed),
        ];
        assert!(!is_date_occupied(d("2024-07-12"), &list));
    }

    #[test]
    fn pending_occupies() {
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Pending)];
        assert!(is_date_occupied(d("2024-07-12"), &list));
    }

    // ── is_range_bookable ─────────────────────────────────

    #[test]
    fn confirmed_overlap_blocks_range() {
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Confirmed)];
        let ok = is_range_bookable(d("2024-07-12"), d("2024-07-13"), &list, d(FLOOR)).unwrap();
        assert!(!ok);
    }

    #[test]
    fn cancelled_overlap_does_not_block() {
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Cancelled)];
        let ok = is_range_bookable(d("2024-07-12"), d("2024-07-13"), &list, d(FLOOR)).unwrap();
        assert!(ok);
    }

    #[test]
    fn candidate_enclosing_reservation_blocked() {
        let list = vec![res("2024-07-10", "2024-07-11", ReservationStatus::Pending)];
        assert!(!is_range_bookable(d("2024-07-01"), d("2024-07-31"), &list, d(FLOOR)).unwrap());
    }

    #[test]
    fn touching_ranges_conflict() {
        // Return day of one rental is the pickup day of the next.
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Confirmed)];
        assert!(!is_range_bookable(d("2024-07-15"), d("2024-07-18"), &list, d(FLOOR)).unwrap());
        assert!(is_range_bookable(d("2024-07-16"), d("2024-07-18"), &list, d(FLOOR)).unwrap());
    }

    #[test]
    fn empty_list_always_bookable() {
        assert!(is_range_bookable(d("2024-07-12"), d("2024-07-13"), &[], d(FLOOR)).unwrap());
    }

    #[test]
    fn start_before_floor_not_bookable() {
        assert!(!is_range_bookable(d("2024-07-12"), d("2024-07-13"), &[], d("2024-07-13")).unwrap());
        // Starting on the floor itself is fine.
        assert!(is_range_bookable(d("2024-07-13"), d("2024-07-14"), &[], d("2024-07-13")).unwrap());
    }

    #[test]
    fn reversed_candidate_is_an_error() {
        let err = is_range_bookable(d("2024-07-13"), d("2024-07-12"), &[], d(FLOOR)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange { .. }));
    }

    #[test]
    fn repeated_checks_agree() {
        let list = vec![res("2024-07-10", "2024-07-15", ReservationStatus::Confirmed)];
        let a = is_range_bookable(d("2024-07-01"), d("2024-07-09"), &list, d(FLOOR)).unwrap();
        let b = is_range_bookable(d("2024-07-01"), d("2024-07-09"), &list, d(FLOOR)).unwrap();
        assert_eq!(a, b);
        assert!(a);
    }

    // ── first_conflict ────────────────────────────────────

    #[test]
    fn first_conflict_is_earliest() {
        let late = res("2024-07-20", "2024-07-22", ReservationStatus::Pending);
        let early = res("2024-07-05", "2024-07-08", ReservationStatus::Confirmed);
        let list = vec![late.clone(), early.clone()];
        let hit = first_conflict(&range("2024-07-01", "2024-07-31"), &list).unwrap();
        assert_eq!(hit.id, early.id);
    }

    // ── occupied_days ─────────────────────────────────────

    #[test]
    fn calendar_marks_each_day() {
        let booked = res("2024-07-02", "2024-07-03", ReservationStatus::Confirmed);
        let list = vec![booked.clone()];
        let days = occupied_days(&range("2024-07-01", "2024-07-04"), &list);
        let flags: Vec<bool> = days.iter().map(|d| d.is_occupied()).collect();
        assert_eq!(flags, vec![false, true, true, false]);
        assert_eq!(days[1].reservation_id, Some(booked.id));
    }

    // ── merge / subtract ──────────────────────────────────

    #[test]
    fn merge_overlapping_and_adjacent() {
        let ranges = vec![
            range("2024-07-01", "2024-07-03"),
            range("2024-07-02", "2024-07-05"),
            range("2024-07-06", "2024-07-07"),
            range("2024-07-10", "2024-07-11"),
        ];
        assert_eq!(
            merge_ranges(&ranges),
            vec![range("2024-07-01", "2024-07-07"), range("2024-07-10", "2024-07-11")]
        );
    }

    #[test]
    fn merge_empty() {
        assert!(merge_ranges(&[]).is_empty());
    }

    #[test]
    fn blocked_ranges_ignore_cancelled() {
        let list = vec![
            res("2024-07-10", "2024-07-12", ReservationStatus::Confirmed),
            res("2024-07-13", "2024-07-14", ReservationStatus::Cancelled),
            res("2024-07-01", "2024-07-02", ReservationStatus::Pending),
        ];
        assert_eq!(
            blocked_ranges(&list),
            vec![range("2024-07-01", "2024-07-02"), range("2024-07-10", "2024-07-12")]
        );
    }

    #[test]
    fn subtract_middle_punch() {
        let free = subtract_ranges(
            &[range("2024-07-01", "2024-07-31")],
            &[range("2024-07-10", "2024-07-15")],
        );
        assert_eq!(free, vec![range("2024-07-01", "2024-07-09"), range("2024-07-16", "2024-07-31")]);
    }

    #[test]
    fn subtract_full_cover() {
        let free = subtract_ranges(
            &[range("2024-07-10", "2024-07-12")],
            &[range("2024-07-01", "2024-07-31")],
        );
        assert!(free.is_empty());
    }

    #[test]
    fn subtract_edges() {
        let free = subtract_ranges(
            &[range("2024-07-01", "2024-07-10")],
            &[range("2024-06-25", "2024-07-01"), range("2024-07-10", "2024-07-12")],
        );
        assert_eq!(free, vec![range("2024-07-02", "2024-07-09")]);
    }

    #[test]
    fn subtract_nothing() {
        let base = vec![range("2024-07-01", "2024-07-10")];
        assert_eq!(subtract_ranges(&base, &[]), base);
    }

    #[test]
    fn free_ranges_in_window() {
        let list = vec![
            res("2024-07-03", "2024-07-04", ReservationStatus::Confirmed),
            res("2024-07-08", "2024-07-09", ReservationStatus::Pending),
        ];
        assert_eq!(
            free_ranges(&range("2024-07-01", "2024-07-10"), &list),
            vec![
                range("2024-07-01", "2024-07-02"),
                range("2024-07-05", "2024-07-07"),
                range("2024-07-10", "2024-07-10"),
            ]
        );
    }
}
