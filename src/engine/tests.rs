use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use super::*;

const H: Ms = 3_600_000; // 1 hour in ms

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("allocd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

/// Midnight UTC on the given day of January 2026, plus `hour` hours.
fn jan(day: u32, hour: i64) -> Ms {
    Span::day(NaiveDate::from_ymd_opt(2026, 1, day).unwrap()).start + hour * H
}

/// Reference clock for allocation calls: well before every test interval.
fn now() -> Ms {
    jan(1, 0) - 30 * DAY_MS
}

fn ps5() -> Category {
    Category::new("PS5").unwrap()
}

fn u(n: u128) -> Ulid {
    Ulid::from(n)
}

fn span(start: Ms, end: Ms) -> Span {
    Span::new(start, end).unwrap()
}

/// Engine with `units` PS5 units, ids 1..=units.
async fn engine_with_units(name: &str, units: u128) -> Arc<Engine> {
    let engine = Arc::new(Engine::new(&test_wal_path(name)).unwrap());
    engine.register_category(ps5()).await.unwrap();
    for n in 1..=units {
        engine.add_unit(u(n), ps5(), Some(format!("PS5 #{n}"))).await.unwrap();
    }
    engine
}

fn allocator(engine: &Arc<Engine>) -> Allocator {
    Allocator::new(engine.clone(), engine.clone(), AllocatorConfig::default())
}

fn request(start: Ms, end: Ms) -> AllocationRequest {
    AllocationRequest::new(ps5(), start, end).unwrap()
}

async fn confirm(alloc: &Allocator, start: Ms, end: Ms) -> Option<Reservation> {
    match alloc
        .allocate_and_confirm(&request(start, end), None, now())
        .await
        .unwrap()
    {
        Confirmation::Confirmed(r) => Some(r),
        Confirmation::NoAvailability => None,
    }
}

fn assert_no_double_booking(reservations: &[Reservation]) {
    for (i, a) in reservations.iter().enumerate() {
        for b in &reservations[i + 1..] {
            if a.unit_id == b.unit_id && a.is_confirmed() && b.is_confirmed() {
                assert!(
                    !a.span.overlaps(&b.span),
                    "double booking on {}: {:?} vs {:?}",
                    a.unit_id,
                    a.span,
                    b.span
                );
            }
        }
    }
}

// ── Resource pool ────────────────────────────────────────

#[tokio::test]
async fn register_category_twice_is_rejected() {
    let engine = engine_with_units("register_twice.wal", 0).await;
    let err = engine.register_category(ps5()).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
    assert_eq!(engine.list_categories(), vec![ps5()]);
}

#[tokio::test]
async fn add_unit_requires_known_category() {
    let engine = engine_with_units("add_unit_unknown.wal", 0).await;
    let xbox = Category::new("Xbox").unwrap();
    let err = engine.add_unit(u(1), xbox, None).await.unwrap_err();
    assert!(matches!(err, EngineError::CategoryNotFound(_)));
}

#[tokio::test]
async fn add_unit_duplicate_id_is_rejected() {
    let engine = engine_with_units("add_unit_dup.wal", 1).await;
    let err = engine.add_unit(u(1), ps5(), None).await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyExists(_)));
}

#[tokio::test]
async fn list_active_units_is_ordered_and_skips_retired() {
    let engine = Arc::new(Engine::new(&test_wal_path("pool_order.wal")).unwrap());
    engine.register_category(ps5()).await.unwrap();
    // Added out of order on purpose.
    for n in [3u128, 1, 2] {
        engine.add_unit(u(n), ps5(), None).await.unwrap();
    }
    let ids: Vec<Ulid> = engine
        .list_active_units(&ps5())
        .await
        .unwrap()
        .iter()
        .map(|unit| unit.id)
        .collect();
    assert_eq!(ids, vec![u(1), u(2), u(3)]);

    let retired = engine.retire_unit(u(2)).await.unwrap();
    assert_eq!(retired.status, UnitStatus::Retired);
    let ids: Vec<Ulid> = engine
        .list_active_units(&ps5())
        .await
        .unwrap()
        .iter()
        .map(|unit| unit.id)
        .collect();
    assert_eq!(ids, vec![u(1), u(3)]);

    // Retiring again is a no-op.
    assert_eq!(engine.retire_unit(u(2)).await.unwrap().status, UnitStatus::Retired);
}

#[tokio::test]
async fn unknown_category_is_not_found_but_empty_pool_is_fine() {
    let engine = engine_with_units("pool_empty.wal", 0).await;
    assert!(engine.list_active_units(&ps5()).await.unwrap().is_empty());
    let err = engine
        .list_active_units(&Category::new("Handheld").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CategoryNotFound(_)));
}

// ── Reservation ledger ───────────────────────────────────

#[tokio::test]
async fn create_rejects_overlap_on_same_unit() {
    let engine = engine_with_units("ledger_overlap.wal", 1).await;
    engine.create(u(1), span(jan(10, 10), jan(12, 10)), None).await.unwrap();
    let err = engine
        .create(u(1), span(jan(11, 0), jan(13, 0)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WriteConflict(id) if id == u(1)));
    assert_eq!(engine.list_reservations(u(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_rejects_retired_unit() {
    let engine = engine_with_units("ledger_retired.wal", 1).await;
    engine.retire_unit(u(1)).await.unwrap();
    let err = engine
        .create(u(1), span(jan(10, 0), jan(11, 0)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::WriteConflict(_)));
}

#[tokio::test]
async fn create_on_unknown_unit_is_not_found() {
    let engine = engine_with_units("ledger_unknown_unit.wal", 0).await;
    let err = engine
        .create(u(9), span(jan(10, 0), jan(11, 0)), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn has_overlap_is_a_pure_read() {
    let engine = engine_with_units("ledger_reads.wal", 1).await;
    engine.create(u(1), span(jan(10, 0), jan(11, 0)), None).await.unwrap();
    let probe = span(jan(10, 12), jan(10, 13));
    for _ in 0..3 {
        assert!(engine.has_overlap(u(1), probe).await.unwrap());
    }
    assert!(!engine.has_overlap(u(1), span(jan(11, 0), jan(12, 0))).await.unwrap());

    let day = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
    let first = engine.list_overlapping(&ps5(), day).await.unwrap();
    let second = engine.list_overlapping(&ps5(), day).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
}

#[tokio::test]
async fn list_overlapping_covers_every_unit_and_skips_cancelled() {
    let engine = engine_with_units("ledger_list_overlapping.wal", 3).await;
    let a = engine.create(u(1), span(jan(14, 20), jan(15, 2)), None).await.unwrap();
    let b = engine.create(u(2), span(jan(15, 10), jan(15, 12)), None).await.unwrap();
    let c = engine.create(u(3), span(jan(15, 23), jan(17, 0)), None).await.unwrap();
    // Ends exactly at midnight: not on the 15th.
    engine.create(u(3), span(jan(14, 0), jan(15, 0)), None).await.unwrap();
    let cancelled = engine.create(u(1), span(jan(15, 12), jan(15, 14)), None).await.unwrap();
    engine.cancel_reservation(cancelled.id).await.unwrap();
    // Reservations on a retired unit still occupy the ledger.
    engine.retire_unit(u(3)).await.unwrap();

    let day = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
    let ids: Vec<Ulid> = engine
        .list_overlapping(&ps5(), day)
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![a.id, b.id, c.id]);
}

#[tokio::test]
async fn cancel_keeps_record_and_frees_slot() {
    let engine = engine_with_units("ledger_cancel.wal", 1).await;
    let alloc = allocator(&engine);
    let first = confirm(&alloc, jan(10, 0), jan(12, 0)).await.unwrap();
    assert!(confirm(&alloc, jan(11, 0), jan(13, 0)).await.is_none());

    let cancelled = engine.cancel_reservation(first.id).await.unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);
    assert_eq!(
        engine.get_reservation(first.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    // Cancelling twice is harmless.
    assert_eq!(
        engine.cancel_reservation(first.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );

    let second = confirm(&alloc, jan(11, 0), jan(13, 0)).await.unwrap();
    assert_eq!(second.unit_id, u(1));
    assert_eq!(engine.list_reservations(u(1)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let engine = engine_with_units("ledger_unknown_reservation.wal", 1).await;
    let id = Ulid::new();
    assert!(matches!(
        engine.get_reservation(id).await,
        Err(EngineError::NotFound(x)) if x == id
    ));
    assert!(matches!(
        engine.cancel_reservation(id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Allocation scenarios ─────────────────────────────────

#[tokio::test]
async fn allocate_skips_overlapping_unit() {
    let engine = engine_with_units("scenario_skip.wal", 2).await;
    engine.create(u(1), span(jan(10, 10), jan(12, 10)), None).await.unwrap();
    let alloc = allocator(&engine);
    let got = alloc.allocate(&request(jan(11, 0), jan(13, 0)), now()).await.unwrap();
    assert_eq!(got, Allocation::Unit(u(2)));
}

#[tokio::test]
async fn allocate_reports_no_availability_when_exhausted() {
    let engine = engine_with_units("scenario_exhausted.wal", 2).await;
    engine.create(u(1), span(jan(10, 0), jan(15, 0)), None).await.unwrap();
    engine.create(u(2), span(jan(10, 0), jan(15, 0)), None).await.unwrap();
    let alloc = allocator(&engine);
    let got = alloc.allocate(&request(jan(12, 0), jan(13, 0)), now()).await.unwrap();
    assert_eq!(got, Allocation::NoAvailability);
}

#[tokio::test]
async fn back_to_back_booking_reuses_unit() {
    let engine = engine_with_units("scenario_adjacent.wal", 2).await;
    engine.create(u(1), span(jan(10, 10), jan(11, 10)), None).await.unwrap();
    let alloc = allocator(&engine);
    let r = confirm(&alloc, jan(11, 10), jan(12, 10)).await.unwrap();
    assert_eq!(r.unit_id, u(1));
    assert_no_double_booking(&engine.list_reservations(u(1)).await.unwrap());
}

#[tokio::test]
async fn month_calendar_counts_overlapping_reservations() {
    let engine = engine_with_units("scenario_calendar.wal", 2).await;
    engine.create(u(1), span(jan(15, 8), jan(15, 10)), None).await.unwrap();
    engine.create(u(1), span(jan(15, 12), jan(15, 14)), None).await.unwrap();
    engine.create(u(2), span(jan(14, 18), jan(15, 7)), None).await.unwrap();

    let calendar = Calendar::new(engine.clone(), engine.clone(), CapacityPolicy::OverlapCount);
    let days = calendar.month_availability(&ps5(), 2026, 1).await.unwrap();
    assert_eq!(days.len(), 31);
    assert_eq!(days[14].date, NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());
    assert_eq!(days[14].status, DayStatus::Full);
    assert_eq!(days[14].reserved, 3);
    assert_eq!(days[14].capacity, 2);
    assert_eq!(days[19].status, DayStatus::Available);
    assert_eq!(days[19].reserved, 0);

    // The true peak on the 15th never reaches two.
    let peak = Calendar::new(engine.clone(), engine.clone(), CapacityPolicy::PeakConcurrency);
    let days = peak.month_availability(&ps5(), 2026, 1).await.unwrap();
    assert_eq!(days[14].status, DayStatus::Available);
}

#[tokio::test]
async fn empty_pool_is_never_available() {
    let engine = engine_with_units("scenario_empty_pool.wal", 0).await;
    let alloc = allocator(&engine);
    assert_eq!(
        alloc.allocate(&request(jan(3, 0), jan(4, 0)), now()).await.unwrap(),
        Allocation::NoAvailability
    );
    let calendar = Calendar::new(engine.clone(), engine.clone(), CapacityPolicy::default());
    let days = calendar.month_availability(&ps5(), 2026, 1).await.unwrap();
    assert!(days.iter().all(|d| d.status == DayStatus::Full));
}

#[tokio::test]
async fn retired_unit_is_not_allocated() {
    let engine = engine_with_units("scenario_retired.wal", 2).await;
    engine.retire_unit(u(1)).await.unwrap();
    let alloc = allocator(&engine);
    let r = confirm(&alloc, jan(5, 0), jan(6, 0)).await.unwrap();
    assert_eq!(r.unit_id, u(2));
    assert!(confirm(&alloc, jan(5, 0), jan(6, 0)).await.is_none());
}

#[tokio::test]
async fn retired_unit_bookings_still_count_against_active_capacity() {
    let engine = engine_with_units("scenario_retired_calendar.wal", 2).await;
    engine.create(u(2), span(jan(15, 9), jan(15, 11)), None).await.unwrap();
    engine.retire_unit(u(2)).await.unwrap();

    // Unit 1 is free all day, yet the day reads FULL: one reservation
    // against a capacity of one active unit.
    let calendar = Calendar::new(engine.clone(), engine.clone(), CapacityPolicy::OverlapCount);
    let days = calendar.month_availability(&ps5(), 2026, 1).await.unwrap();
    assert_eq!(days[14].capacity, 1);
    assert_eq!(days[14].reserved, 1);
    assert_eq!(days[14].status, DayStatus::Full);

    let alloc = allocator(&engine);
    let r = confirm(&alloc, jan(15, 9), jan(15, 11)).await.unwrap();
    assert_eq!(r.unit_id, u(1));
}

#[tokio::test]
async fn allocation_is_deterministic() {
    let engine = engine_with_units("scenario_deterministic.wal", 4).await;
    engine.create(u(1), span(jan(5, 0), jan(9, 0)), None).await.unwrap();
    let alloc = allocator(&engine);
    let req = request(jan(6, 0), jan(7, 0));
    let first = alloc.allocate(&req, now()).await.unwrap();
    for _ in 0..10 {
        assert_eq!(alloc.allocate(&req, now()).await.unwrap(), first);
    }
    assert_eq!(first, Allocation::Unit(u(2)));
}

#[tokio::test]
async fn requester_is_recorded_on_reservation() {
    let engine = engine_with_units("scenario_requester.wal", 1).await;
    let alloc = allocator(&engine);
    let got = alloc
        .allocate_and_confirm(&request(jan(5, 0), jan(6, 0)), Some("user-42".into()), now())
        .await
        .unwrap();
    let Confirmation::Confirmed(r) = got else {
        panic!("expected a reservation");
    };
    assert_eq!(
        engine.get_reservation(r.id).await.unwrap().requester.as_deref(),
        Some("user-42")
    );
}

// ── Concurrency ──────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pair_for_last_unit_confirms_once() {
    let engine = engine_with_units("concurrent_pair.wal", 2).await;
    engine.create(u(2), span(jan(1, 0), jan(31, 0)), None).await.unwrap();
    let alloc = Arc::new(allocator(&engine));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let alloc = alloc.clone();
        handles.push(tokio::spawn(async move {
            alloc
                .allocate_and_confirm(&request(jan(10, 0), jan(11, 0)), None, now())
                .await
                .unwrap()
        }));
    }
    let mut confirmed = Vec::new();
    let mut unavailable = 0;
    for h in handles {
        match h.await.unwrap() {
            Confirmation::Confirmed(r) => confirmed.push(r),
            Confirmation::NoAvailability => unavailable += 1,
        }
    }
    assert_eq!(confirmed.len(), 1);
    assert_eq!(unavailable, 1);
    assert_eq!(confirmed[0].unit_id, u(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_fan_out_never_double_books() {
    let engine = engine_with_units("concurrent_fan_out.wal", 3).await;
    let alloc = Arc::new(allocator(&engine));

    let mut handles = Vec::new();
    for i in 0..40i64 {
        let alloc = alloc.clone();
        // Two staggered windows that overlap each other.
        let (start, end) = if i % 2 == 0 {
            (jan(10, 0), jan(11, 0))
        } else {
            (jan(10, 12), jan(11, 12))
        };
        handles.push(tokio::spawn(async move {
            alloc
                .allocate_and_confirm(&request(start, end), None, now())
                .await
                .unwrap()
        }));
    }
    let mut confirmed = 0;
    for h in handles {
        if let Confirmation::Confirmed(_) = h.await.unwrap() {
            confirmed += 1;
        }
    }
    // Every unit fits exactly one of the overlapping windows.
    assert_eq!(confirmed, 3);

    let mut all = Vec::new();
    for n in 1..=3 {
        let rs = engine.list_reservations(u(n)).await.unwrap();
        assert_eq!(rs.len(), 1);
        all.extend(rs);
    }
    assert_no_double_booking(&all);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_requests_all_succeed() {
    let engine = engine_with_units("concurrent_disjoint.wal", 1).await;
    let alloc = Arc::new(allocator(&engine));

    let handles: Vec<_> = (0..24i64)
        .map(|hour| {
            let alloc = alloc.clone();
            tokio::spawn(async move {
                alloc
                    .allocate_and_confirm(&request(jan(20, hour), jan(20, hour + 1)), None, now())
                    .await
                    .unwrap()
            })
        })
        .collect();
    for h in handles {
        assert!(matches!(h.await.unwrap(), Confirmation::Confirmed(_)));
    }
    let rs = engine.list_reservations(u(1)).await.unwrap();
    assert_eq!(rs.len(), 24);
    assert_no_double_booking(&rs);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn state_survives_reopen() {
    let path = test_wal_path("durability_reopen.wal");
    let (kept, cancelled) = {
        let engine = Arc::new(Engine::new(&path).unwrap());
        engine.register_category(ps5()).await.unwrap();
        engine.add_unit(u(1), ps5(), Some("shelf A".into())).await.unwrap();
        engine.add_unit(u(2), ps5(), None).await.unwrap();
        let kept = engine
            .create(u(1), span(jan(10, 0), jan(11, 0)), Some("user-1".into()))
            .await
            .unwrap();
        let cancelled = engine.create(u(1), span(jan(12, 0), jan(13, 0)), None).await.unwrap();
        engine.cancel_reservation(cancelled.id).await.unwrap();
        engine.retire_unit(u(2)).await.unwrap();
        engine
            .record_profile(
                "user-1",
                RequesterProfile {
                    kyc_verified: true,
                    total_bookings: 2,
                },
            )
            .await
            .unwrap();
        (kept, cancelled)
    };

    let engine = Engine::new(&path).unwrap();
    assert_eq!(engine.list_categories(), vec![ps5()]);
    assert_eq!(engine.get_unit(u(1)).await.unwrap().label.as_deref(), Some("shelf A"));
    assert_eq!(engine.get_unit(u(2)).await.unwrap().status, UnitStatus::Retired);
    assert_eq!(engine.get_reservation(kept.id).await.unwrap(), kept);
    assert_eq!(
        engine.get_reservation(cancelled.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    assert!(engine.has_overlap(u(1), span(jan(10, 12), jan(10, 13))).await.unwrap());
    assert!(!engine.has_overlap(u(1), span(jan(12, 0), jan(13, 0))).await.unwrap());
    assert!(engine.profile("user-1").await.unwrap().is_some());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("durability_compact.wal");
    let (kept, cancelled) = {
        let engine = engine_with_units("durability_compact.wal", 2).await;
        let mut kept = Vec::new();
        for day in 2..12 {
            kept.push(engine.create(u(1), span(jan(day, 0), jan(day, 12)), None).await.unwrap());
        }
        let cancelled = engine.create(u(2), span(jan(3, 0), jan(4, 0)), None).await.unwrap();
        engine.cancel_reservation(cancelled.id).await.unwrap();
        engine.retire_unit(u(2)).await.unwrap();

        assert!(engine.wal_appends_since_compact().await > 10);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Appends after compaction land in the new file.
        kept.push(engine.create(u(1), span(jan(20, 0), jan(21, 0)), None).await.unwrap());
        (kept, cancelled)
    };

    let engine = Engine::new(&path).unwrap();
    for r in &kept {
        assert_eq!(engine.get_reservation(r.id).await.unwrap(), *r);
    }
    assert_eq!(
        engine.get_reservation(cancelled.id).await.unwrap().status,
        ReservationStatus::Cancelled
    );
    assert_eq!(engine.get_unit(u(2)).await.unwrap().status, UnitStatus::Retired);
    assert_eq!(engine.list_reservations(u(1)).await.unwrap().len(), kept.len());
}

#[tokio::test]
async fn unchanged_profile_is_not_rewritten() {
    let engine = engine_with_units("profile_unchanged.wal", 0).await;
    let profile = RequesterProfile {
        kyc_verified: false,
        total_bookings: 0,
    };
    engine.record_profile("user-7", profile).await.unwrap();
    let before = engine.wal_appends_since_compact().await;
    engine.record_profile("user-7", profile).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, before);

    let validator = ConstraintValidator::new(engine.clone());
    let e = validator.validate("user-7").await.unwrap();
    assert!(e.is_first_time);
    assert!(!e.can_pickup);
}

#[tokio::test]
async fn commit_completes_even_if_caller_gives_up() {
    let engine = engine_with_units("commit_detached.wal", 1).await;
    // A zero timeout abandons the future at its first await point.
    let _ = tokio::time::timeout(
        Duration::ZERO,
        engine.create(u(1), span(jan(8, 0), jan(9, 0)), None),
    )
    .await;
    // Whatever happened, the ledger and the WAL agree after a reopen.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let live = engine.list_reservations(u(1)).await.unwrap();
    let reopened = Engine::new(&test_wal_path_existing("commit_detached.wal")).unwrap();
    assert_eq!(reopened.list_reservations(u(1)).await.unwrap(), live);
}

#[tokio::test]
async fn handed_off_reservation_lands_without_a_waiter() {
    let engine = engine_with_units("handoff_dropped.wal", 1).await;
    let pending = engine
        .begin_create(u(1), span(jan(8, 0), jan(9, 0)), None)
        .await
        .unwrap();
    drop(pending);

    // The write lock is held until the commit applies, so this read waits for it.
    let reservations = engine.list_reservations(u(1)).await.unwrap();
    assert_eq!(reservations.len(), 1);
    assert!(reservations[0].is_confirmed());
}

#[tokio::test]
async fn store_timeout_before_hand_off_leaves_no_reservation() {
    let engine = engine_with_units("handoff_timeout.wal", 1).await;
    let alloc = Allocator::new(
        engine.clone(),
        engine.clone(),
        AllocatorConfig {
            store_timeout: Duration::from_millis(50),
            ..AllocatorConfig::default()
        },
    );

    let lock = engine.get_unit_state(&u(1)).unwrap();
    let held = lock.write_owned().await;
    let err = alloc
        .allocate_and_confirm(&request(jan(8, 0), jan(9, 0)), None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DependencyUnavailable(_)));
    drop(held);

    assert!(engine.list_reservations(u(1)).await.unwrap().is_empty());
    let r = confirm(&alloc, jan(8, 0), jan(9, 0)).await.unwrap();
    assert_eq!(r.unit_id, u(1));
}

/// Path of a WAL a previous step already wrote (no cleanup).
fn test_wal_path_existing(name: &str) -> PathBuf {
    std::env::temp_dir().join("allocd_test_engine").join(name)
}
