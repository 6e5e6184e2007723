use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::ReservationError;
use crate::models::{ScheduleFilter, Slot, SlotExpectation, SlotKey, SlotState, SlotTable};

/// Persistence and concurrency boundary for slot tables.
///
/// `transition` is the only way a slot changes after publish. It must behave
/// as one compare-and-swap on one slot: the expectation is checked and the
/// new state written as a single atomic step, so that of any set of racing
/// conflicting calls exactly one succeeds.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserts a table if no table exists for its (doctor, date).
    async fn publish(&self, table: SlotTable) -> Result<(), ReservationError>;

    async fn load_table(&self, doctor_id: Uuid, date: NaiveDate)
        -> Result<SlotTable, ReservationError>;

    async fn load_slot(&self, key: &SlotKey) -> Result<Slot, ReservationError>;

    async fn transition(
        &self,
        key: &SlotKey,
        expected: &SlotExpectation,
        next: SlotState,
        now: DateTime<Utc>,
    ) -> Result<Slot, ReservationError>;

    async fn list_tables(&self, filter: &ScheduleFilter) -> Result<Vec<SlotTable>, ReservationError>;

    /// Every held slot whose hold lapsed at or before `now`, with its holder.
    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SlotKey, String)>, ReservationError>;
}

pub(crate) fn conflict(key: &SlotKey, expected: &SlotExpectation, found: &SlotState) -> ReservationError {
    ReservationError::Conflict {
        slot: key.clone(),
        expected: expected.to_string(),
        found: found.status().to_string(),
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// One published table: an arena of independently locked slots plus a
/// time-to-position index. The index never changes after publish.
struct StoredTable {
    doctor_id: Uuid,
    date: NaiveDate,
    specialty: Option<String>,
    index: HashMap<NaiveTime, usize>,
    slots: Vec<Mutex<Slot>>,
}

impl StoredTable {
    fn from_table(table: SlotTable) -> Self {
        let index = table
            .slots
            .iter()
            .enumerate()
            .map(|(position, slot)| (slot.time, position))
            .collect();

        Self {
            doctor_id: table.doctor_id,
            date: table.date,
            specialty: table.specialty,
            index,
            slots: table.slots.into_iter().map(Mutex::new).collect(),
        }
    }

    fn slot(&self, key: &SlotKey) -> Result<&Mutex<Slot>, ReservationError> {
        self.index
            .get(&key.time)
            .map(|position| &self.slots[*position])
            .ok_or_else(|| ReservationError::NotFound(format!("slot {}", key)))
    }

    fn snapshot(&self) -> SlotTable {
        SlotTable {
            doctor_id: self.doctor_id,
            date: self.date,
            specialty: self.specialty.clone(),
            slots: self.slots.iter().map(|slot| slot.lock().clone()).collect(),
        }
    }
}

/// Process-local store. The table map lock is held only long enough to find
/// a table; each transition then locks exactly one slot.
#[derive(Default)]
pub struct InMemoryReservationStore {
    tables: RwLock<HashMap<(Uuid, NaiveDate), Arc<StoredTable>>>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, doctor_id: Uuid, date: NaiveDate) -> Result<Arc<StoredTable>, ReservationError> {
        self.tables
            .read()
            .get(&(doctor_id, date))
            .cloned()
            .ok_or_else(|| {
                ReservationError::NotFound(format!("schedule for doctor {} on {}", doctor_id, date))
            })
    }

    fn all_tables(&self) -> Vec<Arc<StoredTable>> {
        self.tables.read().values().cloned().collect()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn publish(&self, table: SlotTable) -> Result<(), ReservationError> {
        let mut tables = self.tables.write();
        match tables.entry((table.doctor_id, table.date)) {
            Entry::Occupied(_) => Err(ReservationError::DuplicateSchedule {
                doctor_id: table.doctor_id,
                date: table.date,
            }),
            Entry::Vacant(vacant) => {
                debug!("Publishing {} slots for doctor {} on {}", table.slots.len(), table.doctor_id, table.date);
                vacant.insert(Arc::new(StoredTable::from_table(table)));
                Ok(())
            }
        }
    }

    async fn load_table(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<SlotTable, ReservationError> {
        Ok(self.table(doctor_id, date)?.snapshot())
    }

    async fn load_slot(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        let table = self.table(key.doctor_id, key.date)?;
        let slot = table.slot(key)?.lock().clone();
        Ok(slot)
    }

    async fn transition(
        &self,
        key: &SlotKey,
        expected: &SlotExpectation,
        next: SlotState,
        now: DateTime<Utc>,
    ) -> Result<Slot, ReservationError> {
        let table = self.table(key.doctor_id, key.date)?;
        let mut slot = table.slot(key)?.lock();

        if !expected.matches(&slot.state, now) {
            return Err(conflict(key, expected, &slot.state));
        }

        slot.state = next;
        Ok(slot.clone())
    }

    async fn list_tables(&self, filter: &ScheduleFilter) -> Result<Vec<SlotTable>, ReservationError> {
        let mut tables: Vec<SlotTable> = self
            .all_tables()
            .into_iter()
            .map(|table| table.snapshot())
            .filter(|table| table.matches(filter))
            .collect();
        tables.sort_by(|a, b| (a.date, a.doctor_id).cmp(&(b.date, b.doctor_id)));
        Ok(tables)
    }

    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(SlotKey, String)>, ReservationError> {
        let mut expired = Vec::new();

        for table in self.all_tables() {
            for slot in &table.slots {
                let slot = slot.lock();
                if let SlotState::Held { held_by, hold_expires_at } = &slot.state {
                    if *hold_expires_at <= now {
                        expired.push((
                            SlotKey::new(table.doctor_id, table.date, slot.time),
                            held_by.clone(),
                        ));
                    }
                }
            }
        }

        Ok(expired)
    }
}
