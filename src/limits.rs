//! Hard limits applied before anything reaches the WAL.

pub const MAX_VEHICLES: usize = 100_000;
/// Pending plus confirmed reservations on one vehicle. Closed ones do not count.
pub const MAX_RESERVATIONS_PER_VEHICLE: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_NOTE_LEN: usize = 4096;

/// Longest single rental, in calendar days.
pub const MAX_RENTAL_DAYS: i64 = 366;

/// Widest calendar or free-range query, in calendar days.
pub const MAX_CALENDAR_WINDOW_DAYS: i64 = 731;

/// Reservations must fall within these calendar years.
pub const MIN_VALID_YEAR: i32 = 2000;
pub const MAX_VALID_YEAR: i32 = 2200;
