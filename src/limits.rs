use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_LABEL_LEN: usize = 128;
pub const MAX_REQUESTER_ID_LEN: usize = 128;

pub const MAX_CATEGORIES: usize = 1_000;
pub const MAX_UNITS_PER_CATEGORY: usize = 10_000;
pub const MAX_RESERVATIONS_PER_UNIT: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One year. Rentals longer than this are not a scheduling problem.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 24 * 3_600_000;

pub const MIN_CALENDAR_YEAR: i32 = 2000;
pub const MAX_CALENDAR_YEAR: i32 = 2099;
