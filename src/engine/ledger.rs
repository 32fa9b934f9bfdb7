use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::overlap::any_overlap;
use super::{join_commit, now_ms, validate_requester_id, Engine, EngineError};

/// The authoritative record of claimed intervals.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// True iff a CONFIRMED reservation on `unit_id` overlaps `span`.
    async fn has_overlap(&self, unit_id: Ulid, span: Span) -> Result<bool, EngineError>;

    /// Claim `span` on the unit and hand the durable write to its commit task.
    ///
    /// Fails with `WriteConflict` if the unit was claimed or retired since the
    /// caller last looked. Once this returns `Ok` the reservation will be
    /// written or fail as a whole, whether or not the caller waits for it.
    async fn begin_create(
        &self,
        unit_id: Ulid,
        span: Span,
        requester: Option<String>,
    ) -> Result<PendingReservation, EngineError>;

    /// Insert a CONFIRMED reservation, atomically with its own overlap check.
    async fn create(
        &self,
        unit_id: Ulid,
        span: Span,
        requester: Option<String>,
    ) -> Result<Reservation, EngineError> {
        self.begin_create(unit_id, span, requester).await?.wait().await
    }

    /// CONFIRMED reservations on any unit of `category` that intersect the UTC day.
    async fn list_overlapping(
        &self,
        category: &Category,
        day: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError>;
}

/// A reservation whose write has been handed off but may not be durable yet.
pub struct PendingReservation {
    reservation: Reservation,
    commit: Option<JoinHandle<Result<(), EngineError>>>,
}

impl PendingReservation {
    /// Already durable; nothing left to wait for.
    pub fn ready(reservation: Reservation) -> Self {
        Self {
            reservation,
            commit: None,
        }
    }

    pub(super) fn committing(
        reservation: Reservation,
        commit: JoinHandle<Result<(), EngineError>>,
    ) -> Self {
        Self {
            reservation,
            commit: Some(commit),
        }
    }

    /// Wait for the write and return the reservation it made durable.
    pub async fn wait(self) -> Result<Reservation, EngineError> {
        if let Some(commit) = self.commit {
            join_commit(commit).await?;
        }
        Ok(self.reservation)
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

#[async_trait]
impl ReservationLedger for Engine {
    async fn has_overlap(&self, unit_id: Ulid, span: Span) -> Result<bool, EngineError> {
        let us = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(any_overlap(&span, guard.overlapping(&span)))
    }

    async fn begin_create(
        &self,
        unit_id: Ulid,
        span: Span,
        requester: Option<String>,
    ) -> Result<PendingReservation, EngineError> {
        validate_span(&span)?;
        if let Some(ref r) = requester {
            validate_requester_id(r)?;
        }
        let us = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.write_owned().await;

        if !guard.unit.is_active() {
            tracing::debug!(%unit_id, "create rejected: unit retired");
            return Err(EngineError::WriteConflict(unit_id));
        }
        if let Some(existing) = guard.first_conflict(&span) {
            tracing::debug!(%unit_id, existing = %existing.id, "create rejected: overlap");
            return Err(EngineError::WriteConflict(unit_id));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_UNIT {
            return Err(EngineError::LimitExceeded("too many reservations on unit"));
        }

        let reservation = Reservation {
            id: Ulid::new(),
            unit_id,
            span,
            status: ReservationStatus::Confirmed,
            requester,
            created_at: now_ms(),
        };
        let event = Event::ReservationConfirmed {
            id: reservation.id,
            unit_id,
            span,
            requester: reservation.requester.clone(),
            created_at: reservation.created_at,
        };
        let commit = self.spawn_unit_commit(guard, event);
        Ok(PendingReservation::committing(reservation, commit))
    }

    async fn list_overlapping(
        &self,
        category: &Category,
        day: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = Span::day(day);
        let mut found = Vec::new();
        for id in self.category_unit_ids(category)? {
            let Some(us) = self.get_unit_state(&id) else {
                continue;
            };
            let guard = us.read().await;
            found.extend(guard.confirmed_overlapping(&window).cloned());
        }
        found.sort_by_key(|r| (r.span.start, r.id));
        Ok(found)
    }
}

// ── Ledger maintenance and lookups ───────────────────────

impl Engine {
    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let unit_id = self.unit_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let us = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Every reservation on the unit, cancelled ones included, by start time.
    pub async fn list_reservations(&self, unit_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let us = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.read().await;
        Ok(guard.reservations.clone())
    }

    /// CONFIRMED → CANCELLED. The record is kept; cancelling twice is a no-op.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let unit_id = self.unit_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let us = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        let guard = us.write_owned().await;
        let mut reservation = guard
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !reservation.is_confirmed() {
            return Ok(reservation);
        }

        tracing::info!(%id, %unit_id, "cancelling reservation");
        self.commit_unit(guard, Event::ReservationCancelled { id, unit_id })
            .await?;
        reservation.status = ReservationStatus::Cancelled;
        Ok(reservation)
    }
}
