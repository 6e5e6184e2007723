#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use schedule_cell::*;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn time(label: &str) -> NaiveTime {
    parse_time_label(label).unwrap()
}

pub fn start_of_day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

/// Slot-freed listener that only records what it was told.
#[derive(Default)]
pub struct RecordingListener {
    pub freed: Mutex<Vec<(SlotKey, FreedBy)>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<(SlotKey, FreedBy)> {
        self.freed.lock().clone()
    }
}

#[async_trait]
impl SlotFreedListener for RecordingListener {
    async fn on_slot_freed(&self, _engine: &SlotReservationEngine, slot: &SlotKey, cause: FreedBy) {
        self.freed.lock().push((slot.clone(), cause));
    }
}

pub struct TestHarness {
    pub engine: Arc<SlotReservationEngine>,
    pub clock: Arc<ManualClock>,
    pub listener: Arc<RecordingListener>,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

impl TestHarness {
    /// Engine over an in-memory store with one published table for
    /// 2025-03-01: 09:00, 09:30, 10:00.
    pub async fn new() -> Self {
        let store: Arc<dyn ReservationStore> = Arc::new(InMemoryReservationStore::new());
        let clock = Arc::new(ManualClock::new(start_of_day()));
        let engine = Arc::new(SlotReservationEngine::with_clock(
            store,
            clock.clone(),
            EngineSettings::default(),
        ));
        let listener = Arc::new(RecordingListener::default());
        engine.set_slot_freed_listener(listener.clone());

        let doctor_id = Uuid::new_v4();
        let date = date(2025, 3, 1);
        engine
            .publish(PublishScheduleRequest {
                doctor_id,
                date,
                times: vec!["09:00".into(), "09:30".into(), "10:00".into()],
                specialty: Some("Cardiology".into()),
            })
            .await
            .unwrap();

        Self {
            engine,
            clock,
            listener,
            doctor_id,
            date,
        }
    }

    pub fn key(&self, label: &str) -> SlotKey {
        SlotKey::new(self.doctor_id, self.date, time(label))
    }
}
