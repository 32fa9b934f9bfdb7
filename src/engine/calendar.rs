use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::limits::{MAX_CALENDAR_YEAR, MIN_CALENDAR_YEAR};
use crate::model::*;

use super::overlap::peak_concurrency;
use super::{EngineError, ReservationLedger, ResourcePool};

/// How a day's demand is compared against the category's capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapacityPolicy {
    /// Count every confirmed reservation touching the day. Conservative:
    /// three short back-to-back bookings on one unit count as three, so a
    /// day can read FULL while a unit is still free for part of it.
    #[default]
    OverlapCount,
    /// Highest number of reservations active at the same instant within
    /// the day.
    PeakConcurrency,
}

/// Month calendar over a category. Read-only.
pub struct Calendar {
    pool: Arc<dyn ResourcePool>,
    ledger: Arc<dyn ReservationLedger>,
    policy: CapacityPolicy,
}

impl Calendar {
    pub fn new(
        pool: Arc<dyn ResourcePool>,
        ledger: Arc<dyn ReservationLedger>,
        policy: CapacityPolicy,
    ) -> Self {
        Self {
            pool,
            ledger,
            policy,
        }
    }

    /// One entry per day of the month, ascending.
    ///
    /// A category with no active units is FULL every day.
    pub async fn month_availability(
        &self,
        category: &Category,
        year: i32,
        month: u32,
    ) -> Result<Vec<DayAvailability>, EngineError> {
        if !(MIN_CALENDAR_YEAR..=MAX_CALENDAR_YEAR).contains(&year) {
            return Err(EngineError::InvalidMonth { year, month });
        }
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or(EngineError::InvalidMonth { year, month })?;

        let capacity = self.pool.list_active_units(category).await?.len() as u32;

        let mut days = Vec::with_capacity(31);
        for date in first.iter_days().take_while(|d| d.month() == month) {
            let reservations = self.ledger.list_overlapping(category, date).await?;
            let reserved = match self.policy {
                CapacityPolicy::OverlapCount => reservations.len() as u32,
                CapacityPolicy::PeakConcurrency => {
                    let window = Span::day(date);
                    let clamped: Vec<Span> = reservations
                        .iter()
                        .filter_map(|r| r.span.clamp_to(&window))
                        .collect();
                    peak_concurrency(&clamped)
                }
            };
            let status = if reserved >= capacity {
                DayStatus::Full
            } else {
                DayStatus::Available
            };
            days.push(DayAvailability {
                date,
                status,
                reserved,
                capacity,
            });
        }

        tracing::debug!(
            %category,
            year,
            month,
            capacity,
            full_days = days.iter().filter(|d| d.status == DayStatus::Full).count(),
            "month availability computed"
        );
        Ok(days)
    }
}
