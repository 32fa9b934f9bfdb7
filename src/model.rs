use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{overlap, EngineError};
use crate::limits::MAX_NAME_LEN;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Rejects empty and inverted intervals up front so nothing downstream
    /// has to re-check `start < end`.
    pub fn new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidInterval {
                start,
                end,
                reason: "start must be before end",
            });
        }
        Ok(Self { start, end })
    }

    /// The UTC calendar day `[00:00, 24:00)`.
    pub fn day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        Self {
            start,
            end: start + DAY_MS,
        }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlap::overlaps(self, other)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersection with `window`, or `None` when they don't overlap.
    pub fn clamp_to(&self, window: &Span) -> Option<Span> {
        if !self.overlaps(window) {
            return None;
        }
        Some(Span {
            start: self.start.max(window.start),
            end: self.end.min(window.end),
        })
    }
}

/// A class of interchangeable units, e.g. `PS5` or `Xbox`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl AsRef<str>) -> Result<Self, EngineError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(EngineError::LimitExceeded("category name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("category name too long"));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    Active,
    Retired,
}

/// One physical rentable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: Ulid,
    pub category: Category,
    pub label: Option<String>,
    pub status: UnitStatus,
}

impl Unit {
    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

/// A claim on one unit for `span`. Cancelled reservations are kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
    pub requester: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

/// Per-unit state owned by the ledger: the unit record plus every
/// reservation ever made against it.
#[derive(Debug, Clone)]
pub struct UnitState {
    pub unit: Unit,
    /// Sorted by `span.start`.
    pub reservations: Vec<Reservation>,
}

impl UnitState {
    pub fn new(unit: Unit) -> Self {
        Self {
            unit,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Reservations (any status) whose span overlaps the query window.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    pub fn confirmed_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.is_confirmed())
    }

    /// First confirmed reservation that collides with `span`.
    pub fn first_conflict(&self, span: &Span) -> Option<&Reservation> {
        self.confirmed_overlapping(span).next()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayStatus {
    Available,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub status: DayStatus,
    /// Demand figure the status was derived from (depends on the capacity policy).
    pub reserved: u32,
    /// Active units in the category.
    pub capacity: u32,
}

/// What the profile collaborator knows about a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub kyc_verified: bool,
    pub total_bookings: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eligibility {
    pub can_pickup: bool,
    pub is_first_time: bool,
}

/// The event types: flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CategoryRegistered {
        category: Category,
    },
    UnitAdded {
        id: Ulid,
        category: Category,
        label: Option<String>,
    },
    UnitRetired {
        id: Ulid,
    },
    ReservationConfirmed {
        id: Ulid,
        unit_id: Ulid,
        span: Span,
        requester: Option<String>,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        unit_id: Ulid,
    },
    ProfileRecorded {
        requester_id: String,
        profile: RequesterProfile,
    },
}
