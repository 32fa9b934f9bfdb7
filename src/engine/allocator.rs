use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::ledger::validate_span;
use super::{EngineError, PendingReservation, ReservationLedger, ResourcePool};

#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// How many `WriteConflict`s are retried on the next candidate unit
    /// before the request degrades to `NoAvailability`.
    pub max_conflict_retries: u32,
    /// Upper bound for every pool/ledger call. For writes it covers the
    /// hand-off to the commit task, not the commit itself.
    pub store_timeout: Duration,
    /// How far in the past `start` may lie (0 = not at all).
    pub past_tolerance_ms: Ms,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            store_timeout: Duration::from_secs(2),
            past_tolerance_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationRequest {
    pub category: Category,
    pub span: Span,
}

impl AllocationRequest {
    pub fn new(category: Category, start: Ms, end: Ms) -> Result<Self, EngineError> {
        let span = Span::new(start, end)?;
        validate_span(&span)?;
        Ok(Self { category, span })
    }
}

/// Outcome of the pure allocation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Unit(Ulid),
    NoAvailability,
}

/// Outcome of decide-and-write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed(Reservation),
    NoAvailability,
}

/// First-fit allocator over a resource pool and a reservation ledger.
///
/// Units are tried in the pool's stable (id) order and the first one without
/// an overlapping confirmed reservation wins. No load balancing.
pub struct Allocator {
    pool: Arc<dyn ResourcePool>,
    ledger: Arc<dyn ReservationLedger>,
    config: AllocatorConfig,
}

impl Allocator {
    pub fn new(
        pool: Arc<dyn ResourcePool>,
        ledger: Arc<dyn ReservationLedger>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            pool,
            ledger,
            config,
        }
    }

    /// Pick a free unit for the request without writing anything.
    pub async fn allocate(
        &self,
        request: &AllocationRequest,
        now: Ms,
    ) -> Result<Allocation, EngineError> {
        let started = Instant::now();
        let result = self.decide(request, now).await;
        let outcome = match &result {
            Ok(Allocation::Unit(_)) => "allocated",
            Ok(Allocation::NoAvailability) => "no_availability",
            Err(_) => "error",
        };
        record(observability::MODE_PROBE, outcome, started);
        result
    }

    /// Pick a free unit and confirm a reservation on it.
    ///
    /// A unit claimed between the overlap check and the write surfaces as
    /// `WriteConflict` from the ledger; the next candidate is tried instead,
    /// up to `max_conflict_retries` times.
    pub async fn allocate_and_confirm(
        &self,
        request: &AllocationRequest,
        requester: Option<String>,
        now: Ms,
    ) -> Result<Confirmation, EngineError> {
        let started = Instant::now();
        let result = self.confirm(request, requester, now).await;
        let outcome = match &result {
            Ok(Confirmation::Confirmed(_)) => "allocated",
            Ok(Confirmation::NoAvailability) => "no_availability",
            Err(_) => "error",
        };
        record(observability::MODE_CONFIRM, outcome, started);
        result
    }

    async fn decide(&self, request: &AllocationRequest, now: Ms) -> Result<Allocation, EngineError> {
        self.check_not_past(request, now)?;
        let units = self
            .bounded("list_active_units", self.pool.list_active_units(&request.category))
            .await?;
        for unit in &units {
            let busy = self
                .bounded("has_overlap", self.ledger.has_overlap(unit.id, request.span))
                .await?;
            if !busy {
                tracing::debug!(category = %request.category, unit = %unit.id, "allocation decided");
                return Ok(Allocation::Unit(unit.id));
            }
        }
        tracing::debug!(
            category = %request.category,
            candidates = units.len(),
            "no unit available"
        );
        Ok(Allocation::NoAvailability)
    }

    async fn confirm(
        &self,
        request: &AllocationRequest,
        requester: Option<String>,
        now: Ms,
    ) -> Result<Confirmation, EngineError> {
        self.check_not_past(request, now)?;
        let units = self
            .bounded("list_active_units", self.pool.list_active_units(&request.category))
            .await?;

        let mut conflicts = 0u32;
        for unit in &units {
            let busy = self
                .bounded("has_overlap", self.ledger.has_overlap(unit.id, request.span))
                .await?;
            if busy {
                continue;
            }
            // Only the hand-off is bounded. Once the commit task owns the
            // write it lands or fails as a whole, so wait for its outcome.
            let created = match self
                .bounded(
                    "create",
                    self.ledger.begin_create(unit.id, request.span, requester.clone()),
                )
                .await
            {
                Ok(pending) => pending.wait().await,
                Err(e) => Err(e),
            };
            match created {
                Ok(reservation) => {
                    tracing::info!(
                        category = %request.category,
                        unit = %unit.id,
                        reservation = %reservation.id,
                        "reservation confirmed"
                    );
                    return Ok(Confirmation::Confirmed(reservation));
                }
                Err(EngineError::WriteConflict(unit_id)) => {
                    conflicts += 1;
                    metrics::counter!(observability::WRITE_CONFLICTS_TOTAL).increment(1);
                    tracing::debug!(%unit_id, conflicts, "unit claimed concurrently, trying next");
                    if conflicts > self.config.max_conflict_retries {
                        tracing::warn!(
                            category = %request.category,
                            conflicts,
                            "giving up after repeated write conflicts"
                        );
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Confirmation::NoAvailability)
    }

    fn check_not_past(&self, request: &AllocationRequest, now: Ms) -> Result<(), EngineError> {
        if request.span.start < now - self.config.past_tolerance_ms {
            return Err(EngineError::InvalidInterval {
                start: request.span.start,
                end: request.span.end,
                reason: "start is in the past",
            });
        }
        Ok(())
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.config.store_timeout, "store call timed out");
                Err(EngineError::DependencyUnavailable(format!(
                    "{operation} timed out after {:?}",
                    self.config.store_timeout
                )))
            }
        }
    }
}

fn record(mode: &'static str, outcome: &'static str, started: Instant) {
    metrics::counter!(observability::ALLOCATIONS_TOTAL, "mode" => mode, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(observability::ALLOCATION_DURATION_SECONDS, "mode" => mode)
        .record(started.elapsed().as_secs_f64());
}
