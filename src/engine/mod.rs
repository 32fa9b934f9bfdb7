mod allocator;
mod calendar;
mod eligibility;
mod error;
mod ledger;
pub mod overlap;
mod pool;
#[cfg(test)]
mod tests;

pub use allocator::{Allocation, AllocationRequest, Allocator, AllocatorConfig, Confirmation};
pub use calendar::{Calendar, CapacityPolicy};
pub use eligibility::{evaluate, ConstraintValidator, ProfileSource};
pub use error::EngineError;
pub use ledger::{PendingReservation, ReservationLedger};
pub use pool::ResourcePool;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockWriteGuard, RwLock};
use tokio::task::JoinHandle;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush + fsync for the whole batch, then answer every sender.
///
/// A non-append command found while draining closes the batch first, so
/// commands are applied to the file in the order they were sent.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!("WAL writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even after an append error, so buffered bytes from a
    // failed batch don't leak into the next one.
    let flush_result = wal.flush_sync();
    match append_err {
        Some(e) => Err(e),
        None => flush_result,
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append { event, response: tx })
        .await
        .map_err(|_| EngineError::DependencyUnavailable("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::DependencyUnavailable("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::DependencyUnavailable(format!("WAL write failed: {e}")))
}

/// Wait for a detached commit task. The task finishes whether or not this is awaited.
pub(super) async fn join_commit(
    commit: JoinHandle<Result<(), EngineError>>,
) -> Result<(), EngineError> {
    commit
        .await
        .map_err(|e| EngineError::DependencyUnavailable(format!("commit task failed: {e}")))?
}

// ── State ────────────────────────────────────────────────

/// Everything the engine knows, shared with detached commit tasks.
pub(super) struct EngineState {
    pub(super) units: DashMap<Ulid, SharedUnitState>,
    /// Registered categories → ids of every unit ever added to them.
    pub(super) categories: DashMap<Category, Vec<Ulid>>,
    /// Reverse lookup: reservation id → unit id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    pub(super) profiles: DashMap<String, RequesterProfile>,
}

impl EngineState {
    /// Apply an event that changes the registry rather than a single unit.
    fn apply_registry(&self, event: &Event) {
        match event {
            Event::CategoryRegistered { category } => {
                self.categories.entry(category.clone()).or_default();
            }
            Event::UnitAdded {
                id,
                category,
                label,
            } => {
                let unit = Unit {
                    id: *id,
                    category: category.clone(),
                    label: label.clone(),
                    status: UnitStatus::Active,
                };
                self.units
                    .insert(*id, Arc::new(RwLock::new(UnitState::new(unit))));
                self.categories
                    .entry(category.clone())
                    .or_default()
                    .push(*id);
            }
            Event::ProfileRecorded {
                requester_id,
                profile,
            } => {
                self.profiles.insert(requester_id.clone(), *profile);
            }
            Event::UnitRetired { .. }
            | Event::ReservationConfirmed { .. }
            | Event::ReservationCancelled { .. } => {}
        }
    }
}

/// Apply a unit-scoped event (caller holds the unit's write lock).
fn apply_to_unit(us: &mut UnitState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::UnitRetired { .. } => us.unit.status = UnitStatus::Retired,
        Event::ReservationConfirmed {
            id,
            unit_id,
            span,
            requester,
            created_at,
        } => {
            us.insert_reservation(Reservation {
                id: *id,
                unit_id: *unit_id,
                span: *span,
                status: ReservationStatus::Confirmed,
                requester: requester.clone(),
                created_at: *created_at,
            });
            index.insert(*id, *unit_id);
        }
        Event::ReservationCancelled { id, .. } => {
            if let Some(r) = us.reservation_mut(*id) {
                r.status = ReservationStatus::Cancelled;
            }
        }
        Event::CategoryRegistered { .. }
        | Event::UnitAdded { .. }
        | Event::ProfileRecorded { .. } => {}
    }
}

/// The unit a unit-scoped event belongs to.
fn event_unit_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::UnitRetired { id } => Some(*id),
        Event::ReservationConfirmed { unit_id, .. } | Event::ReservationCancelled { unit_id, .. } => {
            Some(*unit_id)
        }
        Event::CategoryRegistered { .. }
        | Event::UnitAdded { .. }
        | Event::ProfileRecorded { .. } => None,
    }
}

/// In-process Resource Pool + Reservation Ledger, durably backed by the WAL.
///
/// Locking: every append happens while holding either the registry mutex
/// (categories, units, profiles) or the write lock of the unit it touches.
/// That per-unit write lock is what makes "check overlap, then confirm"
/// atomic for a unit.
pub struct Engine {
    pub(super) state: Arc<EngineState>,
    pub(super) registry_lock: Arc<Mutex<()>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    /// Open the WAL at `wal_path`, rebuild state from it and start the writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::open(wal_path)?;

        let state = EngineState {
            units: DashMap::new(),
            categories: DashMap::new(),
            reservation_index: DashMap::new(),
            profiles: DashMap::new(),
        };

        // Unit state is rebuilt unlocked and only wrapped once replay is done.
        let mut replayed: HashMap<Ulid, UnitState> = HashMap::new();
        for event in &events {
            match event {
                Event::UnitAdded {
                    id,
                    category,
                    label,
                } => {
                    replayed.insert(
                        *id,
                        UnitState::new(Unit {
                            id: *id,
                            category: category.clone(),
                            label: label.clone(),
                            status: UnitStatus::Active,
                        }),
                    );
                    state
                        .categories
                        .entry(category.clone())
                        .or_default()
                        .push(*id);
                }
                Event::CategoryRegistered { .. } | Event::ProfileRecorded { .. } => {
                    state.apply_registry(event);
                }
                other => match event_unit_id(other).and_then(|id| replayed.get_mut(&id)) {
                    Some(us) => apply_to_unit(us, other, &state.reservation_index),
                    None => tracing::warn!("replay: skipping event for unknown unit: {other:?}"),
                },
            }
        }
        for (id, us) in replayed {
            state.units.insert(id, Arc::new(RwLock::new(us)));
        }
        tracing::info!(
            events = events.len(),
            categories = state.categories.len(),
            units = state.units.len(),
            reservations = state.reservation_index.len(),
            "engine state restored from {}",
            wal_path.display()
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state: Arc::new(state),
            registry_lock: Arc::new(Mutex::new(())),
            wal_tx,
        })
    }

    pub fn get_unit_state(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.state.units.get(id).map(|e| e.value().clone())
    }

    pub(super) fn unit_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.state
            .reservation_index
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Ids of every unit ever added to `category`, or `CategoryNotFound`.
    pub(super) fn category_unit_ids(&self, category: &Category) -> Result<Vec<Ulid>, EngineError> {
        self.state
            .categories
            .get(category)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineError::CategoryNotFound(category.clone()))
    }

    /// WAL-append then apply to the registry.
    ///
    /// Runs as its own task holding the registry guard, so a caller that stops
    /// waiting cannot leave an event durable but unapplied.
    pub(super) async fn commit_registry(
        &self,
        guard: OwnedMutexGuard<()>,
        event: Event,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        join_commit(tokio::spawn(async move {
            let _guard = guard;
            wal_append(&wal_tx, event.clone()).await?;
            state.apply_registry(&event);
            Ok(())
        }))
        .await
    }

    /// WAL-append then apply to the unit behind `guard`. Detached like
    /// [`Engine::commit_registry`]; the write lock is held until applied.
    pub(super) async fn commit_unit(
        &self,
        guard: OwnedRwLockWriteGuard<UnitState>,
        event: Event,
    ) -> Result<(), EngineError> {
        join_commit(self.spawn_unit_commit(guard, event)).await
    }

    /// Hand `event` to its own commit task and return without waiting.
    pub(super) fn spawn_unit_commit(
        &self,
        mut guard: OwnedRwLockWriteGuard<UnitState>,
        event: Event,
    ) -> JoinHandle<Result<(), EngineError>> {
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, event.clone()).await?;
            apply_to_unit(&mut guard, &event, &state.reservation_index);
            Ok(())
        })
    }

    // ── Requester profiles ───────────────────────────────────

    /// Store the latest profile snapshot pushed by the profile collaborator.
    pub async fn record_profile(
        &self,
        requester_id: &str,
        profile: RequesterProfile,
    ) -> Result<(), EngineError> {
        validate_requester_id(requester_id)?;
        let guard = self.registry_lock.clone().lock_owned().await;
        if self.state.profiles.get(requester_id).as_deref() == Some(&profile) {
            return Ok(());
        }
        let event = Event::ProfileRecorded {
            requester_id: requester_id.to_string(),
            profile,
        };
        self.commit_registry(guard, event).await
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as the minimal event sequence for the current state.
    ///
    /// Holds the registry lock and a read lock on every unit for the whole
    /// operation, so no append can slip in between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry_lock.clone().lock_owned().await;

        let mut unit_ids: Vec<Ulid> = self.state.units.iter().map(|e| *e.key()).collect();
        unit_ids.sort();
        let mut guards = Vec::with_capacity(unit_ids.len());
        for id in &unit_ids {
            if let Some(us) = self.get_unit_state(id) {
                guards.push(us.read_owned().await);
            }
        }

        let mut categories: Vec<Category> =
            self.state.categories.iter().map(|e| e.key().clone()).collect();
        categories.sort();

        let mut events: Vec<Event> = categories
            .into_iter()
            .map(|category| Event::CategoryRegistered { category })
            .collect();

        for us in &guards {
            events.push(Event::UnitAdded {
                id: us.unit.id,
                category: us.unit.category.clone(),
                label: us.unit.label.clone(),
            });
            for r in &us.reservations {
                events.push(Event::ReservationConfirmed {
                    id: r.id,
                    unit_id: r.unit_id,
                    span: r.span,
                    requester: r.requester.clone(),
                    created_at: r.created_at,
                });
                if !r.is_confirmed() {
                    events.push(Event::ReservationCancelled {
                        id: r.id,
                        unit_id: r.unit_id,
                    });
                }
            }
            if !us.unit.is_active() {
                events.push(Event::UnitRetired { id: us.unit.id });
            }
        }

        events.extend(self.state.profiles.iter().map(|e| Event::ProfileRecorded {
            requester_id: e.key().clone(),
            profile: *e.value(),
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::DependencyUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::DependencyUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::DependencyUnavailable(format!("WAL compaction failed: {e}")))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

pub(super) fn validate_requester_id(requester_id: &str) -> Result<(), EngineError> {
    if requester_id.is_empty() {
        return Err(EngineError::LimitExceeded("requester id is empty"));
    }
    if requester_id.len() > crate::limits::MAX_REQUESTER_ID_LEN {
        return Err(EngineError::LimitExceeded("requester id too long"));
    }
    Ok(())
}
