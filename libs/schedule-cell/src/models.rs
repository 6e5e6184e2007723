use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReservationError;

// ==============================================================================
// SLOT IDENTITY
// ==============================================================================

/// Clock-time labels are persisted and exchanged as `HH:MM`.
pub mod time_label {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_time_label(&raw).map_err(serde::de::Error::custom)
    }
}

pub fn parse_time_label(raw: &str) -> Result<NaiveTime, ReservationError> {
    NaiveTime::parse_from_str(raw, time_label::FORMAT)
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| ReservationError::Validation(format!("invalid time label '{}'", raw)))
}

pub fn format_time_label(time: &NaiveTime) -> String {
    time.format(time_label::FORMAT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_label")]
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(doctor_id: Uuid, date: NaiveDate, time: NaiveTime) -> Self {
        Self { doctor_id, date, time }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.doctor_id, self.date, format_time_label(&self.time))
    }
}

// ==============================================================================
// SLOT STATE
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Held,
    Booked,
    Blocked,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotStatus::Available => write!(f, "available"),
            SlotStatus::Held => write!(f, "held"),
            SlotStatus::Booked => write!(f, "booked"),
            SlotStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Hold fields exist only on `Held`, the appointment reference only on
/// `Booked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotState {
    Available,
    Held {
        held_by: String,
        hold_expires_at: DateTime<Utc>,
    },
    Booked {
        appointment_ref: String,
    },
    Blocked,
}

impl SlotState {
    pub fn status(&self) -> SlotStatus {
        match self {
            SlotState::Available => SlotStatus::Available,
            SlotState::Held { .. } => SlotStatus::Held,
            SlotState::Booked { .. } => SlotStatus::Booked,
            SlotState::Blocked => SlotStatus::Blocked,
        }
    }

    /// Available, or held by a hold that has already lapsed.
    pub fn is_free_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            SlotState::Available => true,
            SlotState::Held { hold_expires_at, .. } => *hold_expires_at <= now,
            _ => false,
        }
    }

    pub fn is_live_hold_of(&self, who: &str, now: DateTime<Utc>) -> bool {
        matches!(
            self,
            SlotState::Held { held_by, hold_expires_at } if held_by == who && *hold_expires_at > now
        )
    }

    pub fn holder(&self) -> Option<&str> {
        match self {
            SlotState::Held { held_by, .. } => Some(held_by),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(with = "time_label")]
    pub time: NaiveTime,
    #[serde(flatten)]
    pub state: SlotState,
}

impl Slot {
    pub fn available(time: NaiveTime) -> Self {
        Self {
            time,
            state: SlotState::Available,
        }
    }

    pub fn status(&self) -> SlotStatus {
        self.state.status()
    }
}

/// What a conditional transition requires of the persisted slot at the
/// moment it is applied. Hold expiry is evaluated against the same `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotExpectation {
    /// Available, or held by a lapsed hold.
    Free,
    /// Held by this holder with a live hold.
    HeldBy(String),
    /// Either of the above; used by re-hold and booking.
    FreeOrHeldBy(String),
    /// Held by this holder with a lapsed hold; used by the sweeper.
    ExpiredHoldOf(String),
    BookedAs(String),
    Blocked,
}

impl SlotExpectation {
    pub fn matches(&self, state: &SlotState, now: DateTime<Utc>) -> bool {
        match self {
            SlotExpectation::Free => state.is_free_at(now),
            SlotExpectation::HeldBy(who) => state.is_live_hold_of(who, now),
            SlotExpectation::FreeOrHeldBy(who) => {
                state.is_free_at(now) || state.is_live_hold_of(who, now)
            }
            SlotExpectation::ExpiredHoldOf(who) => matches!(
                state,
                SlotState::Held { held_by, hold_expires_at } if held_by == who && *hold_expires_at <= now
            ),
            SlotExpectation::BookedAs(reference) => matches!(
                state,
                SlotState::Booked { appointment_ref } if appointment_ref == reference
            ),
            SlotExpectation::Blocked => matches!(state, SlotState::Blocked),
        }
    }
}

impl fmt::Display for SlotExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotExpectation::Free => write!(f, "available"),
            SlotExpectation::HeldBy(who) => write!(f, "held by {}", who),
            SlotExpectation::FreeOrHeldBy(who) => write!(f, "available or held by {}", who),
            SlotExpectation::ExpiredHoldOf(who) => write!(f, "lapsed hold by {}", who),
            SlotExpectation::BookedAs(reference) => write!(f, "booked as {}", reference),
            SlotExpectation::Blocked => write!(f, "blocked"),
        }
    }
}

// ==============================================================================
// SLOT TABLE
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTable {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub specialty: Option<String>,
    pub slots: Vec<Slot>,
}

impl SlotTable {
    /// Builds a fresh table with every slot Available, sorted by time.
    pub fn new(
        doctor_id: Uuid,
        date: NaiveDate,
        times: Vec<NaiveTime>,
        specialty: Option<String>,
    ) -> Result<Self, ReservationError> {
        if times.is_empty() {
            return Err(ReservationError::InvalidSlotSet(
                "a schedule needs at least one slot".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(times.len());
        let duplicates: Vec<String> = times
            .iter()
            .filter(|time| !seen.insert(**time))
            .map(format_time_label)
            .collect();
        if !duplicates.is_empty() {
            return Err(ReservationError::InvalidSlotSet(format!(
                "duplicate slot times: {}",
                duplicates.join(", ")
            )));
        }

        let mut times = times;
        times.sort();

        Ok(Self {
            doctor_id,
            date,
            specialty: specialty.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            slots: times.into_iter().map(Slot::available).collect(),
        })
    }

    pub fn find(&self, time: NaiveTime) -> Result<&Slot, ReservationError> {
        self.slots
            .binary_search_by(|slot| slot.time.cmp(&time))
            .map(|index| &self.slots[index])
            .map_err(|_| ReservationError::NotFound(self.key_for(time).to_string()))
    }

    pub fn key_for(&self, time: NaiveTime) -> SlotKey {
        SlotKey::new(self.doctor_id, self.date, time)
    }

    pub fn times(&self) -> Vec<NaiveTime> {
        self.slots.iter().map(|slot| slot.time).collect()
    }

    pub fn matches(&self, filter: &ScheduleFilter) -> bool {
        filter.doctor_id.map_or(true, |id| id == self.doctor_id)
            && filter.date.map_or(true, |date| date == self.date)
            && filter.specialty.as_deref().map_or(true, |wanted| {
                self.specialty
                    .as_deref()
                    .is_some_and(|have| have.eq_ignore_ascii_case(wanted.trim()))
            })
    }
}

// ==============================================================================
// QUERIES & DTOs
// ==============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFilter {
    pub doctor_id: Option<Uuid>,
    pub specialty: Option<String>,
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlot {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_label")]
    pub time: NaiveTime,
    pub specialty: Option<String>,
}

impl AvailableSlot {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.doctor_id, self.date, self.time)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishScheduleRequest {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub times: Vec<String>,
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoldSlotRequest {
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSlotRequest {
    pub appointment_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelBookingRequest {
    pub appointment_ref: String,
}
