use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schedule_cell::SlotKey;

pub const MIN_PRIORITY: i32 = 0;
pub const MAX_PRIORITY: i32 = 100;
pub const DEFAULT_PRIORITY: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Active,
    Fulfilled,
    Cancelled,
    Expired,
}

impl fmt::Display for WaitlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitlistStatus::Active => write!(f, "active"),
            WaitlistStatus::Fulfilled => write!(f, "fulfilled"),
            WaitlistStatus::Cancelled => write!(f, "cancelled"),
            WaitlistStatus::Expired => write!(f, "expired"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: Uuid,
    pub patient_id: String,
    pub doctor_id: Uuid,
    pub preferred_date: NaiveDate,
    #[serde(default)]
    pub alternative_dates: Vec<NaiveDate>,
    pub priority: i32,
    pub status: WaitlistStatus,
    pub expires_at: DateTime<Utc>,
    pub fulfilled_appointment_ref: Option<String>,
    /// Creation order; breaks priority ties first-come first-served.
    pub sequence: u64,
    pub notification_count: u32,
    pub last_offer: Option<SlotKey>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WaitlistEntry {
    pub fn is_active(&self) -> bool {
        self.status == WaitlistStatus::Active
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether this entry asks for `doctor_id` on `date`.
    pub fn wants(&self, doctor_id: Uuid, date: NaiveDate) -> bool {
        self.doctor_id == doctor_id
            && (self.preferred_date == date || self.alternative_dates.contains(&date))
    }

    /// Active, unexpired, and not just offered this very slot.
    pub fn is_candidate_for(&self, slot: &SlotKey, now: DateTime<Utc>) -> bool {
        self.is_active()
            && !self.has_lapsed(now)
            && self.wants(slot.doctor_id, slot.date)
            && self.last_offer.as_ref() != Some(slot)
    }

    /// Serving order: higher priority first, then earlier creation.
    pub fn queue_order(a: &WaitlistEntry, b: &WaitlistEntry) -> Ordering {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.sequence.cmp(&b.sequence))
    }

    pub fn record_offer(&mut self, slot: SlotKey, now: DateTime<Utc>) {
        self.notification_count += 1;
        self.last_offer = Some(slot);
        self.updated_at = now;
    }

    pub fn fulfil(&mut self, appointment_ref: String, now: DateTime<Utc>) {
        self.status = WaitlistStatus::Fulfilled;
        self.fulfilled_appointment_ref = Some(appointment_ref);
        self.updated_at = now;
    }

    pub fn close(&mut self, status: WaitlistStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinWaitlistRequest {
    pub doctor_id: Uuid,
    pub preferred_date: NaiveDate,
    #[serde(default)]
    pub alternative_dates: Vec<NaiveDate>,
    pub priority: Option<i32>,
    pub expires_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptOfferRequest {
    pub appointment_ref: String,
}

/// A hold granted to a waitlist candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistOffer {
    pub entry_id: Uuid,
    pub patient_id: String,
    pub slot: SlotKey,
    pub hold_expires_at: DateTime<Utc>,
}
