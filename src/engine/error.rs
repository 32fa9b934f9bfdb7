use ulid::Ulid;

use crate::model::{Category, Ms};

/// Every failure the scheduling core can report.
///
/// "Nothing free" is deliberately absent: that is a first-class result of the
/// allocator (`Allocation::NoAvailability`), not an error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid interval [{start}, {end}): {reason}")]
    InvalidInterval {
        start: Ms,
        end: Ms,
        reason: &'static str,
    },

    #[error("invalid calendar month: {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },

    #[error("unknown category: {0}")]
    CategoryNotFound(Category),

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The unit was claimed (or retired) between the overlap check and the write.
    #[error("unit {0} was claimed by a concurrent reservation")]
    WriteConflict(Ulid),

    #[error("no profile for requester: {0}")]
    ProfileNotFound(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The backing store could not be reached or did not answer in time.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
}
