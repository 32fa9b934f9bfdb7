use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{
    Allocation, AllocationRequest, Allocator, AllocatorConfig, Calendar, CapacityPolicy,
    Confirmation, ConstraintValidator, Engine, EngineError,
};
use crate::model::*;

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    pub allocator: AllocatorConfig,
    pub capacity_policy: CapacityPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub category: Category,
    pub start: Ms,
    pub end: Ms,
    #[serde(default)]
    pub requester_id: Option<String>,
    /// Requester collects the unit in person instead of delivery.
    #[serde(default)]
    pub pickup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingOutcome {
    Confirmed {
        reservation: Reservation,
        eligibility: Option<Eligibility>,
    },
    NoAvailability,
    PickupDenied {
        eligibility: Eligibility,
    },
}

/// Booking flow: constraint validation, then allocate-and-confirm.
/// Also the one handle the HTTP layer talks to.
pub struct Scheduler {
    engine: Arc<Engine>,
    allocator: Allocator,
    calendar: Calendar,
    validator: ConstraintValidator,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, config: SchedulerConfig) -> Self {
        let allocator = Allocator::new(engine.clone(), engine.clone(), config.allocator);
        let calendar = Calendar::new(engine.clone(), engine.clone(), config.capacity_policy);
        let validator = ConstraintValidator::new(engine.clone());
        Self {
            engine,
            allocator,
            calendar,
            validator,
        }
    }

    /// Inventory and ledger maintenance go straight to the engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn book(&self, request: BookingRequest, now: Ms) -> Result<BookingOutcome, EngineError> {
        let allocation = AllocationRequest::new(request.category, request.start, request.end)?;

        let eligibility = match request.requester_id.as_deref() {
            Some(id) => Some(self.validator.validate(id).await?),
            None => None,
        };
        if request.pickup {
            // No requester means no history: treat as first-time and unverified.
            let e = eligibility.unwrap_or(Eligibility {
                can_pickup: false,
                is_first_time: true,
            });
            if !e.can_pickup {
                tracing::info!(
                    requester = request.requester_id.as_deref().unwrap_or("-"),
                    category = %allocation.category,
                    "pickup denied"
                );
                return Ok(BookingOutcome::PickupDenied { eligibility: e });
            }
        }

        let outcome = self
            .allocator
            .allocate_and_confirm(&allocation, request.requester_id, now)
            .await?;
        Ok(match outcome {
            Confirmation::Confirmed(reservation) => BookingOutcome::Confirmed {
                reservation,
                eligibility,
            },
            Confirmation::NoAvailability => BookingOutcome::NoAvailability,
        })
    }

    /// Which unit a booking would get right now. Writes nothing.
    pub async fn probe(
        &self,
        category: Category,
        start: Ms,
        end: Ms,
        now: Ms,
    ) -> Result<Allocation, EngineError> {
        let request = AllocationRequest::new(category, start, end)?;
        self.allocator.allocate(&request, now).await
    }

    pub async fn month_availability(
        &self,
        category: &Category,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        self.calendar.month_availability(category, year, month).await
    }

    pub async fn eligibility(&self, requester_id: &str) -> Result<Eligibility, EngineError> {
        self.validator.validate(requester_id).await
    }
}
