use std::sync::Arc;

use async_trait::async_trait;

use crate::model::{Eligibility, RequesterProfile};

use super::{Engine, EngineError};

/// Where requester profiles come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn profile(&self, requester_id: &str) -> Result<Option<RequesterProfile>, EngineError>;
}

#[async_trait]
impl ProfileSource for Engine {
    async fn profile(&self, requester_id: &str) -> Result<Option<RequesterProfile>, EngineError> {
        Ok(self.state.profiles.get(requester_id).map(|e| *e.value()))
    }
}

/// Pickup needs a verified requester with at least one prior booking.
pub fn evaluate(profile: &RequesterProfile) -> Eligibility {
    Eligibility {
        can_pickup: profile.kyc_verified && profile.total_bookings >= 1,
        is_first_time: profile.total_bookings == 0,
    }
}

pub struct ConstraintValidator {
    profiles: Arc<dyn ProfileSource>,
}

impl ConstraintValidator {
    pub fn new(profiles: Arc<dyn ProfileSource>) -> Self {
        Self { profiles }
    }

    /// "Cannot pick up" is an answer, not an error; only an unknown
    /// requester fails.
    pub async fn validate(&self, requester_id: &str) -> Result<Eligibility, EngineError> {
        let profile = self
            .profiles
            .profile(requester_id)
            .await?
            .ok_or_else(|| EngineError::ProfileNotFound(requester_id.to_string()))?;
        Ok(evaluate(&profile))
    }
}
