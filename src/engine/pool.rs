use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Read side of the resource pool, as consumed by the allocator and calendar.
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Active units of `category`, ordered by id so allocation is deterministic.
    ///
    /// An empty pool is `Ok(vec![])`; only an unknown category is an error.
    async fn list_active_units(&self, category: &Category) -> Result<Vec<Unit>, EngineError>;
}

#[async_trait]
impl ResourcePool for Engine {
    async fn list_active_units(&self, category: &Category) -> Result<Vec<Unit>, EngineError> {
        let ids = self.category_unit_ids(category)?;
        let mut units = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(us) = self.get_unit_state(&id) else {
                continue;
            };
            let guard = us.read().await;
            if guard.unit.is_active() {
                units.push(guard.unit.clone());
            }
        }
        units.sort_by_key(|u| u.id);
        Ok(units)
    }
}

// ── Inventory maintenance (driven by the inventory collaborator) ──

impl Engine {
    pub async fn register_category(&self, category: Category) -> Result<(), EngineError> {
        let guard = self.registry_lock.clone().lock_owned().await;
        if self.state.categories.contains_key(&category) {
            return Err(EngineError::AlreadyExists(category.to_string()));
        }
        if self.state.categories.len() >= MAX_CATEGORIES {
            return Err(EngineError::LimitExceeded("too many categories"));
        }
        tracing::info!(%category, "registering category");
        self.commit_registry(guard, Event::CategoryRegistered { category })
            .await
    }

    pub fn list_categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .state
            .categories
            .iter()
            .map(|e| e.key().clone())
            .collect();
        categories.sort();
        categories
    }

    /// Add an ACTIVE unit to an already registered category.
    pub async fn add_unit(
        &self,
        id: Ulid,
        category: Category,
        label: Option<String>,
    ) -> Result<Unit, EngineError> {
        if let Some(ref l) = label
            && l.len() > MAX_LABEL_LEN
        {
            return Err(EngineError::LimitExceeded("unit label too long"));
        }
        let guard = self.registry_lock.clone().lock_owned().await;
        let unit_count = self.category_unit_ids(&category)?.len();
        if unit_count >= MAX_UNITS_PER_CATEGORY {
            return Err(EngineError::LimitExceeded("too many units in category"));
        }
        if self.state.units.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        let unit = Unit {
            id,
            category: category.clone(),
            label: label.clone(),
            status: UnitStatus::Active,
        };
        tracing::info!(%id, %category, "adding unit");
        self.commit_registry(
            guard,
            Event::UnitAdded {
                id,
                category,
                label,
            },
        )
        .await?;
        Ok(unit)
    }

    /// ACTIVE → RETIRED. Retiring a retired unit is a no-op.
    ///
    /// Existing reservations stay on the ledger; the unit just stops being
    /// offered to new allocations.
    pub async fn retire_unit(&self, id: Ulid) -> Result<Unit, EngineError> {
        let us = self.get_unit_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = us.write_owned().await;
        let mut unit = guard.unit.clone();
        if !unit.is_active() {
            return Ok(unit);
        }
        tracing::info!(%id, category = %unit.category, "retiring unit");
        self.commit_unit(guard, Event::UnitRetired { id }).await?;
        unit.status = UnitStatus::Retired;
        Ok(unit)
    }

    pub async fn get_unit(&self, id: Ulid) -> Result<Unit, EngineError> {
        let us = self.get_unit_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = us.read().await;
        Ok(guard.unit.clone())
    }
}
