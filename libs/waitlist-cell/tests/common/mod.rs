#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use schedule_cell::*;
use waitlist_cell::*;

/// Notifier that keeps every offer it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    pub offers: Mutex<Vec<WaitlistOffer>>,
}

impl RecordingNotifier {
    pub fn offers(&self) -> Vec<WaitlistOffer> {
        self.offers.lock().clone()
    }

    /// Notifications are dispatched on spawned tasks; wait until `count` arrive.
    pub async fn wait_for(&self, count: usize) -> Vec<WaitlistOffer> {
        for _ in 0..100 {
            if self.offers.lock().len() >= count {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        self.offers()
    }
}

#[async_trait]
impl WaitlistNotifier for RecordingNotifier {
    async fn notify_offer(&self, _entry: &WaitlistEntry, offer: &WaitlistOffer) -> Result<()> {
        self.offers.lock().push(offer.clone());
        Ok(())
    }
}

pub struct WaitlistHarness {
    pub engine: Arc<SlotReservationEngine>,
    pub coordinator: Arc<WaitlistCoordinator>,
    pub repository: Arc<InMemoryWaitlistRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

impl WaitlistHarness {
    /// One doctor with a 2025-03-01 schedule (09:00, 09:30) and the
    /// coordinator wired in as the slot-freed listener.
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 28, 8, 0, 0).unwrap()));
        let store: Arc<dyn ReservationStore> = Arc::new(InMemoryReservationStore::new());
        let engine = Arc::new(SlotReservationEngine::with_clock(
            store,
            clock.clone(),
            EngineSettings::default(),
        ));

        let repository = Arc::new(InMemoryWaitlistRepository::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let coordinator = Arc::new(WaitlistCoordinator::new(
            repository.clone(),
            notifier.clone(),
            clock.clone(),
            WaitlistSettings::default(),
        ));
        engine.set_slot_freed_listener(coordinator.clone());

        let doctor_id = Uuid::new_v4();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        engine
            .publish(PublishScheduleRequest {
                doctor_id,
                date,
                times: vec!["09:00".into(), "09:30".into()],
                specialty: None,
            })
            .await
            .unwrap();

        Self {
            engine,
            coordinator,
            repository,
            notifier,
            clock,
            doctor_id,
            date,
        }
    }

    pub fn key(&self, label: &str) -> SlotKey {
        SlotKey::new(self.doctor_id, self.date, parse_time_label(label).unwrap())
    }

    pub fn join_request(&self, priority: i32) -> JoinWaitlistRequest {
        JoinWaitlistRequest {
            doctor_id: self.doctor_id,
            preferred_date: self.date,
            alternative_dates: vec![],
            priority: Some(priority),
            expires_at: self.clock.now() + Duration::days(7),
            notes: None,
        }
    }

    pub async fn join(&self, patient: &str, priority: i32) -> WaitlistEntry {
        self.coordinator
            .join(patient, self.join_request(priority))
            .await
            .unwrap()
    }

    /// Books a slot for an outside patient and cancels it again, freeing it
    /// for the waitlist.
    pub async fn book_and_cancel(&self, label: &str, appointment_ref: &str) {
        let key = self.key(label);
        self.engine.book(&key, "walk-in", appointment_ref).await.unwrap();
        self.engine.cancel(&key, appointment_ref).await.unwrap();
    }
}
