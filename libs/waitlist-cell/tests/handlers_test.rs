mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::WaitlistHarness;
use schedule_cell::{Clock, SlotState};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use waitlist_cell::{waitlist_routes, WaitlistState};

struct TestApp {
    router: Router,
    config: TestConfig,
    harness: WaitlistHarness,
}

impl TestApp {
    async fn new() -> Self {
        let config = TestConfig::default();
        let harness = WaitlistHarness::new().await;
        let router = waitlist_routes(WaitlistState {
            config: config.to_arc(),
            engine: harness.engine.clone(),
            coordinator: harness.coordinator.clone(),
        });
        Self { router, config, harness }
    }

    async fn send(&self, method: Method, uri: &str, user: &TestUser, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, JwtTestUtils::bearer(user, &self.config));
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn join_body(&self, priority: i32) -> Value {
        json!({
            "doctor_id": self.harness.doctor_id,
            "preferred_date": self.harness.date,
            "priority": priority,
            "expires_at": self.harness.clock.now() + Duration::days(2),
            "notes": "mornings preferred"
        })
    }
}

#[tokio::test]
async fn test_waitlist_requires_authentication() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_join_list_and_withdraw() {
    let app = TestApp::new().await;
    let patient = TestUser::patient("p@example.com");

    let (status, body) = app.send(Method::POST, "/", &patient, Some(app.join_body(7))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "active");
    assert_eq!(body["entry"]["patient_id"], patient.id);
    let entry_id = body["entry"]["id"].as_str().unwrap().to_string();

    let (status, _) = app.send(Method::POST, "/", &patient, Some(app.join_body(7))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.send(Method::POST, "/", &patient, Some(app.join_body(500))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app.send(Method::GET, "/", &patient, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let intruder = TestUser::patient("other@example.com");
    let (status, _) = app
        .send(Method::DELETE, &format!("/{}", entry_id), &intruder, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Method::DELETE, &format!("/{}", entry_id), &patient, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "cancelled");
}

#[tokio::test]
async fn test_accept_offer_over_http() {
    let app = TestApp::new().await;
    let patient = TestUser::patient("p@example.com");

    let (_, body) = app.send(Method::POST, "/", &patient, Some(app.join_body(1))).await;
    let entry_id = body["entry"]["id"].as_str().unwrap().to_string();

    app.harness.book_and_cancel("09:00", "walk-in-apt").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/{}/accept", entry_id),
            &patient,
            Some(json!({ "appointment_ref": "apt-77" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entry"]["status"], "fulfilled");
    assert_eq!(body["entry"]["fulfilled_appointment_ref"], "apt-77");

    let slot = app
        .harness
        .engine
        .find_slot(&app.harness.key("09:00"))
        .await
        .unwrap();
    assert_eq!(
        slot.state,
        SlotState::Booked {
            appointment_ref: "apt-77".into()
        }
    );
}
