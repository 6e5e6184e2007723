use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use schedule_cell::{
    ttl_from_seconds, Clock, FreedBy, ReservationError, SlotFreedListener, SlotKey,
    SlotReservationEngine, SlotState,
};
use shared_config::AppConfig;

use crate::error::WaitlistError;
use crate::models::{
    JoinWaitlistRequest, WaitlistEntry, WaitlistOffer, WaitlistStatus, DEFAULT_PRIORITY,
    MAX_PRIORITY, MIN_PRIORITY,
};
use crate::services::notifier::WaitlistNotifier;
use crate::services::repository::WaitlistRepository;

#[derive(Debug, Clone)]
pub struct WaitlistSettings {
    /// TTL of the hold granted to a waitlist candidate.
    pub offer_ttl: Duration,
    pub expiry_interval: std::time::Duration,
}

impl Default for WaitlistSettings {
    fn default() -> Self {
        Self {
            offer_ttl: Duration::minutes(10),
            expiry_interval: std::time::Duration::from_secs(300),
        }
    }
}

impl WaitlistSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = Self::default();
        Self {
            offer_ttl: ttl_from_seconds(config.waitlist_offer_ttl_seconds)
                .unwrap_or(defaults.offer_ttl),
            expiry_interval: match config.waitlist_sweep_interval_seconds {
                0 => defaults.expiry_interval,
                seconds => std::time::Duration::from_secs(seconds),
            },
        }
    }
}

/// Owns every waitlist entry mutation and back-fills freed slots.
///
/// Mutations go through a single async gate so that two freed slots cannot
/// both be offered to the same entry, and an offer cannot race its own
/// acceptance or withdrawal.
pub struct WaitlistCoordinator {
    repository: Arc<dyn WaitlistRepository>,
    notifier: Arc<dyn WaitlistNotifier>,
    clock: Arc<dyn Clock>,
    settings: WaitlistSettings,
    gate: Mutex<()>,
}

impl WaitlistCoordinator {
    pub fn new(
        repository: Arc<dyn WaitlistRepository>,
        notifier: Arc<dyn WaitlistNotifier>,
        clock: Arc<dyn Clock>,
        settings: WaitlistSettings,
    ) -> Self {
        Self {
            repository,
            notifier,
            clock,
            settings,
            gate: Mutex::new(()),
        }
    }

    // ==========================================================================
    // PATIENT OPERATIONS
    // ==========================================================================

    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id))]
    pub async fn join(
        &self,
        patient_id: &str,
        request: JoinWaitlistRequest,
    ) -> Result<WaitlistEntry, WaitlistError> {
        if patient_id.trim().is_empty() {
            return Err(WaitlistError::Validation("patient id must not be empty".to_string()));
        }

        let priority = request.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(WaitlistError::Validation(format!(
                "priority must be between {} and {}",
                MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        let now = self.clock.now();
        if request.expires_at <= now {
            return Err(WaitlistError::Validation("expires_at must be in the future".to_string()));
        }

        let mut alternative_dates = request.alternative_dates;
        alternative_dates.retain(|date| *date != request.preferred_date);
        alternative_dates.sort();
        alternative_dates.dedup();

        let _gate = self.gate.lock().await;

        let already_waiting = self
            .repository
            .list_for_patient(patient_id)
            .await?
            .into_iter()
            .any(|entry| {
                entry.is_active() && !entry.has_lapsed(now) && entry.doctor_id == request.doctor_id
            });
        if already_waiting {
            return Err(WaitlistError::Conflict(format!(
                "patient already has an active waitlist entry for doctor {}",
                request.doctor_id
            )));
        }

        let entry = self
            .repository
            .insert(WaitlistEntry {
                id: Uuid::new_v4(),
                patient_id: patient_id.to_string(),
                doctor_id: request.doctor_id,
                preferred_date: request.preferred_date,
                alternative_dates,
                priority,
                status: WaitlistStatus::Active,
                expires_at: request.expires_at,
                fulfilled_appointment_ref: None,
                sequence: 0,
                notification_count: 0,
                last_offer: None,
                notes: request.notes,
                created_at: now,
                updated_at: now,
            })
            .await?;

        info!("Patient {} joined waitlist as entry {}", patient_id, entry.id);
        Ok(entry)
    }

    #[instrument(skip(self))]
    pub async fn withdraw(&self, entry_id: Uuid, patient_id: &str) -> Result<WaitlistEntry, WaitlistError> {
        let _gate = self.gate.lock().await;

        let mut entry = self.owned_active_entry(entry_id, patient_id).await?;
        entry.close(WaitlistStatus::Cancelled, self.clock.now());
        self.repository.update(&entry).await?;

        info!("Waitlist entry {} withdrawn", entry_id);
        Ok(entry)
    }

    /// Books the slot last offered to this entry and marks it fulfilled.
    #[instrument(skip(self, engine))]
    pub async fn accept_offer(
        &self,
        engine: &SlotReservationEngine,
        entry_id: Uuid,
        patient_id: &str,
        appointment_ref: &str,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let _gate = self.gate.lock().await;

        let mut entry = self.owned_active_entry(entry_id, patient_id).await?;
        let slot = entry.last_offer.clone().ok_or_else(|| {
            WaitlistError::Conflict(format!("waitlist entry {} has no outstanding offer", entry_id))
        })?;

        engine.book(&slot, patient_id, appointment_ref).await?;

        entry.fulfil(appointment_ref.to_string(), self.clock.now());
        self.repository.update(&entry).await?;

        info!("Waitlist entry {} fulfilled by booking {}", entry_id, appointment_ref);
        Ok(entry)
    }

    pub async fn list_for_patient(&self, patient_id: &str) -> Result<Vec<WaitlistEntry>, WaitlistError> {
        self.repository.list_for_patient(patient_id).await
    }

    async fn owned_active_entry(
        &self,
        entry_id: Uuid,
        patient_id: &str,
    ) -> Result<WaitlistEntry, WaitlistError> {
        let entry = self.repository.get(entry_id).await?;
        if entry.patient_id != patient_id {
            return Err(WaitlistError::Forbidden(entry_id));
        }
        if !entry.is_active() {
            return Err(WaitlistError::NotActive {
                id: entry_id,
                status: entry.status,
            });
        }
        if entry.has_lapsed(self.clock.now()) {
            return Err(WaitlistError::NotActive {
                id: entry_id,
                status: WaitlistStatus::Expired,
            });
        }
        Ok(entry)
    }

    // ==========================================================================
    // BACK-FILL
    // ==========================================================================

    /// Offers a freed slot to the best-ranked eligible entry by placing a hold
    /// in that patient's name. Returns `None` when nobody could take it.
    #[instrument(skip(self, engine), fields(slot = %slot))]
    pub async fn fill_slot(
        &self,
        engine: &SlotReservationEngine,
        slot: &SlotKey,
    ) -> Result<Option<WaitlistOffer>, WaitlistError> {
        let _gate = self.gate.lock().await;
        let now = self.clock.now();

        let candidates = self.repository.candidates(slot.doctor_id, slot.date).await?;
        for mut entry in candidates.into_iter().filter(|entry| entry.is_candidate_for(slot, now)) {
            let held = match engine
                .hold(slot, &entry.patient_id, Some(self.settings.offer_ttl))
                .await
            {
                Ok(held) => held,
                Err(ReservationError::Conflict { .. }) => {
                    debug!("Slot taken before entry {} could be offered it", entry.id);
                    continue;
                }
                Err(ReservationError::Validation(reason)) => {
                    warn!("Skipping waitlist entry {}: {}", entry.id, reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let hold_expires_at = match held.state {
                SlotState::Held { hold_expires_at, .. } => hold_expires_at,
                _ => now + self.settings.offer_ttl,
            };

            // The hold is already granted; the patient still hears about it
            entry.record_offer(slot.clone(), now);
            if let Err(e) = self.repository.update(&entry).await {
                warn!("Failed to record offer on waitlist entry {}: {}", entry.id, e);
            }

            let offer = WaitlistOffer {
                entry_id: entry.id,
                patient_id: entry.patient_id.clone(),
                slot: slot.clone(),
                hold_expires_at,
            };
            info!("Offered slot to waitlist entry {} (patient {})", entry.id, entry.patient_id);
            self.dispatch_notification(entry, offer.clone());
            return Ok(Some(offer));
        }

        debug!("No waitlist candidate for freed slot");
        Ok(None)
    }

    fn dispatch_notification(&self, entry: WaitlistEntry, offer: WaitlistOffer) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_offer(&entry, &offer).await {
                warn!("Failed to notify patient {} of waitlist offer: {}", offer.patient_id, e);
            }
        });
    }

    // ==========================================================================
    // EXPIRY
    // ==========================================================================

    /// Marks every active entry past its deadline as Expired. An entry that
    /// fails to update is left for the next pass.
    #[instrument(skip(self))]
    pub async fn expire_stale_entries(&self) -> Result<usize, WaitlistError> {
        let _gate = self.gate.lock().await;
        let now = self.clock.now();

        let mut expired = 0;
        for mut entry in self.repository.active().await? {
            if !entry.has_lapsed(now) {
                continue;
            }
            entry.close(WaitlistStatus::Expired, now);
            match self.repository.update(&entry).await {
                Ok(()) => expired += 1,
                Err(e) => warn!("Failed to expire waitlist entry {}: {}", entry.id, e),
            }
        }

        if expired > 0 {
            info!("Expired {} waitlist entries", expired);
        }
        Ok(expired)
    }

    pub async fn run_expiry_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = if self.settings.expiry_interval.is_zero() {
            warn!("Waitlist expiry interval is zero, using the default");
            WaitlistSettings::default().expiry_interval
        } else {
            self.settings.expiry_interval
        };
        info!("Waitlist expiry loop started, period {:?}", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.expire_stale_entries().await {
                        warn!("Waitlist expiry pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Waitlist expiry loop stopped");
    }
}

#[async_trait]
impl SlotFreedListener for WaitlistCoordinator {
    async fn on_slot_freed(&self, engine: &SlotReservationEngine, slot: &SlotKey, cause: FreedBy) {
        debug!("Slot {} freed: {:?}", slot, cause);
        if let Err(e) = self.fill_slot(engine, slot).await {
            warn!("Waitlist back-fill for {} dropped: {}", slot, e);
        }
    }
}
