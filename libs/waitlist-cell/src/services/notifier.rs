use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use schedule_cell::format_time_label;
use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{WaitlistEntry, WaitlistOffer};

/// Tells a waitlisted patient that a slot is being held for them.
#[async_trait]
pub trait WaitlistNotifier: Send + Sync {
    async fn notify_offer(&self, entry: &WaitlistEntry, offer: &WaitlistOffer) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct NotificationRow {
    id: Uuid,
    user_id: String,
    notification_type: &'static str,
    title: String,
    message: String,
    data: serde_json::Value,
    is_read: bool,
    created_at: chrono::DateTime<Utc>,
}

/// Writes offers into the `notifications` table; delivery is someone else's job.
pub struct SupabaseNotifier {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }
}

#[async_trait]
impl WaitlistNotifier for SupabaseNotifier {
    async fn notify_offer(&self, entry: &WaitlistEntry, offer: &WaitlistOffer) -> Result<()> {
        let row = NotificationRow {
            id: Uuid::new_v4(),
            user_id: offer.patient_id.clone(),
            notification_type: "waitlist_offer",
            title: "A slot opened up".to_string(),
            message: format!(
                "An appointment on {} at {} is held for you until {}.",
                offer.slot.date,
                format_time_label(&offer.slot.time),
                offer.hold_expires_at.format("%H:%M UTC")
            ),
            data: serde_json::json!({
                "waitlist_entry_id": entry.id,
                "doctor_id": offer.slot.doctor_id,
                "date": offer.slot.date,
                "time": format_time_label(&offer.slot.time),
                "hold_expires_at": offer.hold_expires_at,
            }),
            is_read: false,
            created_at: Utc::now(),
        };

        self.supabase.insert_row("notifications", &row, None).await
    }
}

/// Logs offers instead of delivering them.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl WaitlistNotifier for TracingNotifier {
    async fn notify_offer(&self, entry: &WaitlistEntry, offer: &WaitlistOffer) -> Result<()> {
        info!(
            "Waitlist offer for entry {}: patient {} holds {} until {}",
            entry.id, offer.patient_id, offer.slot, offer.hold_expires_at
        );
        Ok(())
    }
}
