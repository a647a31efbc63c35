use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, Router};
use chrono::{FixedOffset, NaiveTime, TimeZone};
use http::StatusCode;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use reception_cell::clock::{Clock, FixedClock};
use reception_cell::services::ReceptionService;
use reception_cell::store::MemoryReceptionStore;
use reception_cell::{reception_routes, ReceptionState};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    store: MemoryReceptionStore,
    token: String,
    staff: TestUser,
}

fn clinic_clock() -> FixedClock {
    FixedClock(
        FixedOffset::east_opt(7 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 17, 7, 0, 0)
            .unwrap(),
    )
}

fn test_app(slot_capacity: i64) -> TestApp {
    let config = TestConfig {
        slot_capacity,
        ..TestConfig::default()
    };
    let store = MemoryReceptionStore::new(Duration::from_secs(30));
    store.add_room(2);

    let service = ReceptionService::new(
        Arc::new(store.clone()),
        Arc::new(clinic_clock()),
        config.slot_capacity,
    );
    let state = Arc::new(ReceptionState {
        config: config.to_arc(),
        service,
    });

    let staff = TestUser::receptionist("frontdesk@clinic.test");
    let token = JwtTestUtils::create_test_token(&staff, &config.jwt_secret, None);

    TestApp {
        router: reception_routes(state),
        store,
        token,
        staff,
    }
}

fn walk_in_body(patient_id: Uuid) -> Value {
    json!({
        "existingPatientId": patient_id,
        "appointment": {
            "staffId": 5,
            "roomId": 2,
            "appointmentDate": clinic_clock().today(),
            "appointmentTime": NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            "serviceType": "consultation"
        },
        "receptionType": "direct"
    })
}

fn post(token: Option<&str>, body: String) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(body)).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_reception_returns_ticket_in_camel_case() {
    let app = test_app(10);
    let patient = app.store.seed_patient("Cao Thi P", "0930000001");

    let response = app
        .router
        .oneshot(post(Some(&app.token), walk_in_body(patient.id).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["queueNumber"], 1);
    assert_eq!(body["patient"]["id"], json!(patient.id));
    assert_eq!(body["patient"]["fullName"], "Cao Thi P");
    assert_eq!(body["queue"]["roomId"], 2);
    assert_eq!(body["queue"]["status"], "waiting");
    assert_eq!(body["queue"]["createdBy"], json!(app.staff.id));
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let app = test_app(10);
    let patient = app.store.seed_patient("Cao Thi P", "0930000001");

    let response = app
        .router
        .oneshot(post(None, walk_in_body(patient.id).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.store.appointments().is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_bad_request() {
    let app = test_app(10);
    let mut body = walk_in_body(Uuid::new_v4());
    body["appointment"]["staffId"] = json!(0);

    let response = app
        .router
        .oneshot(post(Some(&app.token), body.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn test_malformed_json_is_a_validation_error() {
    let app = test_app(10);

    let response = app
        .router
        .oneshot(post(Some(&app.token), r#"{"receptionType": "phone"}"#.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn test_full_slot_is_a_conflict() {
    let app = test_app(1);
    let first = app.store.seed_patient("Cao Thi P", "0930000001");
    let second = app.store.seed_patient("Cao Van Q", "0930000002");

    let response = app
        .router
        .clone()
        .oneshot(post(Some(&app.token), walk_in_body(first.id).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(post(Some(&app.token), walk_in_body(second.id).to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["kind"], "slot_full");
    assert!(body["error"].as_str().unwrap().contains("full"));
}
