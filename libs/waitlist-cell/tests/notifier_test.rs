use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use schedule_cell::SlotKey;
use shared_utils::test_utils::TestConfig;
use waitlist_cell::*;

fn entry_and_offer() -> (WaitlistEntry, WaitlistOffer) {
    let now = Utc::now();
    let slot = SlotKey::new(
        Uuid::new_v4(),
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
    );
    let entry = WaitlistEntry {
        id: Uuid::new_v4(),
        patient_id: "patient-1".to_string(),
        doctor_id: slot.doctor_id,
        preferred_date: slot.date,
        alternative_dates: vec![],
        priority: 5,
        status: WaitlistStatus::Active,
        expires_at: now + Duration::days(3),
        fulfilled_appointment_ref: None,
        sequence: 1,
        notification_count: 1,
        last_offer: Some(slot.clone()),
        notes: None,
        created_at: now,
        updated_at: now,
    };
    let offer = WaitlistOffer {
        entry_id: entry.id,
        patient_id: entry.patient_id.clone(),
        slot,
        hold_expires_at: now + Duration::minutes(10),
    };
    (entry, offer)
}

#[tokio::test]
async fn test_supabase_notifier_inserts_notification_row() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_supabase_url(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .and(header("apikey", "test-anon-key"))
        .and(header("Prefer", "return=minimal"))
        .and(body_partial_json(json!({
            "user_id": "patient-1",
            "notification_type": "waitlist_offer",
            "is_read": false,
            "data": { "time": "09:00", "date": "2025-03-01" }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = SupabaseNotifier::new(&config);
    let (entry, offer) = entry_and_offer();
    notifier.notify_offer(&entry, &offer).await.unwrap();
}

#[tokio::test]
async fn test_supabase_notifier_surfaces_api_errors() {
    let mock_server = MockServer::start().await;
    let config = TestConfig::default().with_supabase_url(&mock_server.uri()).to_app_config();

    Mock::given(method("POST"))
        .and(path("/rest/v1/notifications"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let notifier = SupabaseNotifier::new(&config);
    let (entry, offer) = entry_and_offer();
    let result = notifier.notify_offer(&entry, &offer).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tracing_notifier_never_fails() {
    let (entry, offer) = entry_and_offer();
    assert!(TracingNotifier.notify_offer(&entry, &offer).await.is_ok());
}
