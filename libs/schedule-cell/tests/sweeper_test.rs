mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tokio::sync::watch;
use uuid::Uuid;

use common::{start_of_day, time, RecordingListener, TestHarness};
use schedule_cell::*;

/// In-memory store whose transitions on one time of day always fail.
struct FlakyStore {
    inner: InMemoryReservationStore,
    broken_time: NaiveTime,
}

#[async_trait]
impl ReservationStore for FlakyStore {
    async fn publish(&self, table: SlotTable) -> Result<(), ReservationError> {
        self.inner.publish(table).await
    }

    async fn load_table(&self, doctor_id: Uuid, date: NaiveDate) -> Result<SlotTable, ReservationError> {
        self.inner.load_table(doctor_id, date).await
    }

    async fn load_slot(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        self.inner.load_slot(key).await
    }

    async fn transition(
        &self,
        key: &SlotKey,
        expected: &SlotExpectation,
        next: SlotState,
        now: DateTime<Utc>,
    ) -> Result<Slot, ReservationError> {
        if key.time == self.broken_time && next == SlotState::Available {
            return Err(ReservationError::Persistence("connection reset".to_string()));
        }
        self.inner.transition(key, expected, next, now).await
    }

    async fn list_tables(&self, filter: &ScheduleFilter) -> Result<Vec<SlotTable>, ReservationError> {
        self.inner.list_tables(filter).await
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<(SlotKey, String)>, ReservationError> {
        self.inner.expired_holds(now).await
    }
}

#[tokio::test]
async fn test_sweep_reclaims_only_lapsed_holds() {
    let h = TestHarness::new().await;
    let sweeper = ExpirySweeper::new(Arc::clone(&h.engine), std::time::Duration::from_secs(300));

    h.engine.hold(&h.key("09:00"), "p1", None).await.unwrap();
    h.engine
        .hold(&h.key("09:30"), "p2", Some(Duration::minutes(30)))
        .await
        .unwrap();

    assert_eq!(sweeper.sweep_once().await, SweepReport::default());

    h.clock.advance(Duration::minutes(10));
    let report = sweeper.sweep_once().await;
    assert_eq!(
        report,
        SweepReport {
            scanned: 1,
            reclaimed: 1,
            skipped: 0,
            failed: 0
        }
    );

    let reclaimed = h.engine.find_slot(&h.key("09:00")).await.unwrap();
    assert_eq!(reclaimed.state, SlotState::Available);
    let untouched = h.engine.find_slot(&h.key("09:30")).await.unwrap();
    assert_eq!(untouched.state.holder(), Some("p2"));

    assert_eq!(
        h.listener.events(),
        vec![(h.key("09:00"), FreedBy::HoldExpired { holder: "p1".into() })]
    );
}

#[tokio::test]
async fn test_sweep_skips_slot_that_moved_on() {
    let h = TestHarness::new().await;
    let sweeper = ExpirySweeper::new(Arc::clone(&h.engine), std::time::Duration::from_secs(300));
    let key = h.key("09:00");

    h.engine.hold(&key, "p1", None).await.unwrap();
    h.clock.advance(Duration::minutes(11));

    // Another patient takes the lapsed hold before the reclaim lands
    let stale = h.engine.expired_holds().await.unwrap();
    assert_eq!(stale, vec![(key.clone(), "p1".to_string())]);
    h.engine.book(&key, "p2", "apt-2").await.unwrap();

    let result = h.engine.reclaim_expired_hold(&key, "p1").await;
    assert!(matches!(result, Err(ReservationError::Conflict { .. })));

    let report = sweeper.sweep_once().await;
    assert_eq!(report.reclaimed, 0);
    assert_eq!(
        h.engine.find_slot(&key).await.unwrap().state,
        SlotState::Booked {
            appointment_ref: "apt-2".into()
        }
    );
    assert!(h.listener.events().is_empty());
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let h = TestHarness::new().await;
    let sweeper = ExpirySweeper::new(Arc::clone(&h.engine), std::time::Duration::from_millis(10));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    h.engine.hold(&h.key("10:00"), "p1", None).await.unwrap();
    h.clock.advance(Duration::minutes(20));

    let handle = sweeper.spawn(shutdown_rx);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper should stop promptly")
        .unwrap();

    assert_eq!(
        h.engine.find_slot(&h.key("10:00")).await.unwrap().state,
        SlotState::Available
    );
}

#[tokio::test]
async fn test_persistence_failure_does_not_abort_sweep() {
    let clock = Arc::new(ManualClock::new(start_of_day()));
    let store = Arc::new(FlakyStore {
        inner: InMemoryReservationStore::new(),
        broken_time: time("09:30"),
    });
    let engine = Arc::new(SlotReservationEngine::with_clock(
        store,
        clock.clone(),
        EngineSettings::default(),
    ));
    let listener = Arc::new(RecordingListener::default());
    engine.set_slot_freed_listener(listener.clone());

    let doctor_id = Uuid::new_v4();
    let date = common::date(2025, 3, 1);
    engine
        .publish(PublishScheduleRequest {
            doctor_id,
            date,
            times: vec!["09:00".into(), "09:30".into(), "10:00".into()],
            specialty: None,
        })
        .await
        .unwrap();
    let key = |label: &str| SlotKey::new(doctor_id, date, time(label));

    for (label, holder) in [("09:00", "p1"), ("09:30", "p2"), ("10:00", "p3")] {
        engine.hold(&key(label), holder, None).await.unwrap();
    }
    clock.advance(Duration::minutes(15));

    let sweeper = ExpirySweeper::new(Arc::clone(&engine), std::time::Duration::from_secs(300));
    let report = sweeper.sweep_once().await;
    assert_eq!(
        report,
        SweepReport {
            scanned: 3,
            reclaimed: 2,
            skipped: 0,
            failed: 1
        }
    );

    assert_eq!(engine.find_slot(&key("09:00")).await.unwrap().state, SlotState::Available);
    assert_eq!(engine.find_slot(&key("10:00")).await.unwrap().state, SlotState::Available);
    // The failed slot is still recorded as the lapsed hold, for the next pass
    assert_eq!(engine.find_slot(&key("09:30")).await.unwrap().state.holder(), Some("p2"));
    assert_eq!(listener.events().len(), 2);
}

#[tokio::test]
async fn test_zero_period_falls_back_instead_of_panicking() {
    let h = TestHarness::new().await;
    let sweeper = ExpirySweeper::new(Arc::clone(&h.engine), std::time::Duration::ZERO);
    assert_eq!(sweeper.period(), std::time::Duration::from_secs(300));

    let mut config = shared_config::AppConfig::default();
    config.hold_sweep_interval_seconds = 0;
    let from_config = ExpirySweeper::from_config(Arc::clone(&h.engine), &config);
    assert_eq!(from_config.period(), std::time::Duration::from_secs(300));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = sweeper.spawn(shutdown_rx);
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    shutdown_tx.send(true).unwrap();

    let joined = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper should stop promptly");
    assert!(joined.is_ok());
}
