use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::clock::{Clock, SystemClock};
use crate::error::ReservationError;
use crate::models::{
    parse_time_label, AvailableSlot, PublishScheduleRequest, ScheduleFilter, Slot,
    SlotExpectation, SlotKey, SlotState, SlotTable,
};
use crate::services::store::ReservationStore;

/// Why a slot returned to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreedBy {
    Cancellation { appointment_ref: String },
    HoldExpired { holder: String },
}

/// Hook run after a booked slot is cancelled or a lapsed hold is reclaimed.
/// The engine is passed in so the listener can place holds through the same
/// public operations as any other caller.
#[async_trait]
pub trait SlotFreedListener: Send + Sync {
    async fn on_slot_freed(&self, engine: &SlotReservationEngine, slot: &SlotKey, cause: FreedBy);
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_hold_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_hold_ttl: Duration::minutes(10),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        match ttl_from_seconds(config.hold_ttl_seconds) {
            Some(default_hold_ttl) => Self { default_hold_ttl },
            None => Self::default(),
        }
    }
}

/// Positive, representable TTL from a configured number of seconds.
pub fn ttl_from_seconds(seconds: u64) -> Option<Duration> {
    i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .filter(|ttl| *ttl > Duration::zero())
}

pub struct SlotReservationEngine {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    listener: RwLock<Option<Arc<dyn SlotFreedListener>>>,
}

impl SlotReservationEngine {
    pub fn new(store: Arc<dyn ReservationStore>, settings: EngineSettings) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), settings)
    }

    pub fn with_clock(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            clock,
            settings,
            listener: RwLock::new(None),
        }
    }

    pub fn set_slot_freed_listener(&self, listener: Arc<dyn SlotFreedListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn default_hold_ttl(&self) -> Duration {
        self.settings.default_hold_ttl
    }

    // ==========================================================================
    // SCHEDULES & QUERIES
    // ==========================================================================

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn publish(&self, request: PublishScheduleRequest) -> Result<SlotTable, ReservationError> {
        let times = request
            .times
            .iter()
            .map(|label| parse_time_label(label))
            .collect::<Result<Vec<_>, _>>()?;

        let table = SlotTable::new(request.doctor_id, request.date, times, request.specialty)?;
        self.store.publish(table.clone()).await?;

        info!("Published schedule with {} slots", table.slots.len());
        Ok(table)
    }

    pub async fn get_table(&self, doctor_id: Uuid, date: NaiveDate) -> Result<SlotTable, ReservationError> {
        self.store.load_table(doctor_id, date).await
    }

    pub async fn find_slot(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        self.store.load_slot(key).await
    }

    /// Slots a new hold could take right now, lapsed holds included.
    pub async fn available_slots(
        &self,
        filter: &ScheduleFilter,
    ) -> Result<Vec<AvailableSlot>, ReservationError> {
        let now = self.now();
        let tables = self.store.list_tables(filter).await?;

        Ok(tables
            .into_iter()
            .flat_map(|table| {
                let SlotTable { doctor_id, date, specialty, slots } = table;
                slots
                    .into_iter()
                    .filter(move |slot| slot.state.is_free_at(now))
                    .map(move |slot| AvailableSlot {
                        doctor_id,
                        date,
                        time: slot.time,
                        specialty: specialty.clone(),
                    })
            })
            .collect())
    }

    pub async fn expired_holds(&self) -> Result<Vec<(SlotKey, String)>, ReservationError> {
        self.store.expired_holds(self.now()).await
    }

    // ==========================================================================
    // SLOT TRANSITIONS
    // ==========================================================================

    /// Places or extends a hold. A second hold by the same holder before
    /// expiry moves the expiry to `now + ttl`.
    #[instrument(skip(self), fields(slot = %key))]
    pub async fn hold(
        &self,
        key: &SlotKey,
        who: &str,
        ttl: Option<Duration>,
    ) -> Result<Slot, ReservationError> {
        require_identity(who, "holder")?;
        let ttl = ttl.unwrap_or(self.settings.default_hold_ttl);
        if ttl <= Duration::zero() {
            return Err(ReservationError::Validation("hold TTL must be positive".to_string()));
        }

        let now = self.now();
        let hold_expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| ReservationError::Validation("hold TTL is out of range".to_string()))?;
        let next = SlotState::Held {
            held_by: who.to_string(),
            hold_expires_at,
        };

        let slot = self
            .apply(key, SlotExpectation::FreeOrHeldBy(who.to_string()), next, now)
            .await?;
        debug!("Slot held by {} until {:?}", who, slot.state);
        Ok(slot)
    }

    /// Drops a hold. Releasing a slot that is already free, including one
    /// whose hold has lapsed, succeeds without changing anything.
    #[instrument(skip(self), fields(slot = %key))]
    pub async fn release(&self, key: &SlotKey, who: &str) -> Result<Slot, ReservationError> {
        require_identity(who, "holder")?;
        let now = self.now();

        match self
            .apply(key, SlotExpectation::HeldBy(who.to_string()), SlotState::Available, now)
            .await
        {
            Ok(slot) => {
                debug!("Hold released by {}", who);
                Ok(slot)
            }
            Err(conflict @ ReservationError::Conflict { .. }) => {
                let current = self.store.load_slot(key).await?;
                if current.state.is_free_at(now) {
                    debug!("Release is a no-op, slot already free");
                    Ok(current)
                } else {
                    Err(conflict)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Converts an Available slot, or one held by `who`, into a booking.
    #[instrument(skip(self), fields(slot = %key))]
    pub async fn book(
        &self,
        key: &SlotKey,
        who: &str,
        appointment_ref: &str,
    ) -> Result<Slot, ReservationError> {
        require_identity(who, "booker")?;
        require_identity(appointment_ref, "appointment reference")?;

        let slot = self
            .apply(
                key,
                SlotExpectation::FreeOrHeldBy(who.to_string()),
                SlotState::Booked {
                    appointment_ref: appointment_ref.to_string(),
                },
                self.now(),
            )
            .await?;

        info!("Slot booked by {} as {}", who, appointment_ref);
        Ok(slot)
    }

    /// Frees a booked slot and hands it to the slot-freed listener.
    #[instrument(skip(self), fields(slot = %key))]
    pub async fn cancel(&self, key: &SlotKey, appointment_ref: &str) -> Result<Slot, ReservationError> {
        require_identity(appointment_ref, "appointment reference")?;

        let slot = self
            .apply(
                key,
                SlotExpectation::BookedAs(appointment_ref.to_string()),
                SlotState::Available,
                self.now(),
            )
            .await?;

        info!("Booking {} cancelled, slot returned to pool", appointment_ref);
        self.notify_freed(
            key,
            FreedBy::Cancellation {
                appointment_ref: appointment_ref.to_string(),
            },
        )
        .await;
        Ok(slot)
    }

    #[instrument(skip(self), fields(slot = %key))]
    pub async fn block(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        let slot = self
            .apply(key, SlotExpectation::Free, SlotState::Blocked, self.now())
            .await?;
        info!("Slot blocked");
        Ok(slot)
    }

    #[instrument(skip(self), fields(slot = %key))]
    pub async fn unblock(&self, key: &SlotKey) -> Result<Slot, ReservationError> {
        let slot = self
            .apply(key, SlotExpectation::Blocked, SlotState::Available, self.now())
            .await?;
        info!("Slot unblocked");
        Ok(slot)
    }

    /// Returns a lapsed hold to the pool. Fails with `Conflict` if the slot
    /// moved on since the hold was observed, e.g. the holder booked it.
    #[instrument(skip(self), fields(slot = %key))]
    pub async fn reclaim_expired_hold(&self, key: &SlotKey, holder: &str) -> Result<Slot, ReservationError> {
        let slot = self
            .apply(
                key,
                SlotExpectation::ExpiredHoldOf(holder.to_string()),
                SlotState::Available,
                self.now(),
            )
            .await?;

        debug!("Reclaimed lapsed hold of {}", holder);
        self.notify_freed(
            key,
            FreedBy::HoldExpired {
                holder: holder.to_string(),
            },
        )
        .await;
        Ok(slot)
    }

    async fn apply(
        &self,
        key: &SlotKey,
        expected: SlotExpectation,
        next: SlotState,
        now: DateTime<Utc>,
    ) -> Result<Slot, ReservationError> {
        self.store.transition(key, &expected, next, now).await.map_err(|e| {
            if e.is_conflict() {
                debug!("Transition rejected: {}", e);
            }
            e
        })
    }

    async fn notify_freed(&self, key: &SlotKey, cause: FreedBy) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_slot_freed(self, key, cause).await;
        }
    }
}

fn require_identity(value: &str, what: &str) -> Result<(), ReservationError> {
    if value.trim().is_empty() {
        return Err(ReservationError::Validation(format!("{} must not be empty", what)));
    }
    Ok(())
}
