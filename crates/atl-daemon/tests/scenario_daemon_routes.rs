//! In-process scenario tests for atl-daemon HTTP endpoints.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` over a MemStore-backed workflow and
//! drives it via `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use atl_config::WorkshopConfig;
use atl_daemon::{identity::USER_HEADER, routes, state};
use atl_db::{MemStore, Store};
use atl_notify::BroadcastRealtime;
use atl_schemas::{Role, User};
use atl_workflow::{FixedClock, Workflow};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt; // oneshot
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn staff(role: Role) -> User {
    User {
        id: Uuid::new_v4(),
        external_id: None,
        email: format!("{}@atelier.test", Uuid::new_v4()),
        first_name: "Ousmane".to_string(),
        last_name: "Gueye".to_string(),
        role,
        disponibilite: true,
        push_token: None,
        created_at: now() - Duration::days(30),
    }
}

struct Harness {
    st: Arc<state::AppState>,
    admin: Uuid,
    employee: Uuid,
}

async fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let admin = staff(Role::Admin);
    let employee = staff(Role::Employee);
    let mut tx = store.begin().await.unwrap();
    tx.insert_user(&admin).await.unwrap();
    tx.insert_user(&employee).await.unwrap();
    tx.commit().await.unwrap();

    let workflow = Workflow::new(
        store,
        Arc::new(FixedClock::new(now())),
        &WorkshopConfig::default(),
    )
    .unwrap();
    let st = state::AppState::new(Arc::new(workflow), Arc::new(BroadcastRealtime::default()));
    Harness {
        st: Arc::new(st),
        admin: admin.id,
        employee: employee.id,
    }
}

impl Harness {
    fn router(&self) -> axum::Router {
        routes::build_router(Arc::clone(&self.st))
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        user: Option<Uuid>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(u) = user {
            req = req.header(USER_HEADER, u.to_string());
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(axum::body::Body::from(b.to_string()))
                .unwrap(),
            None => req.body(axum::body::Body::empty()).unwrap(),
        };
        call(self.router(), req).await
    }
}

/// Drive the router with a single request and return (status, json body).
async fn call(
    router: axum::Router,
    req: Request<axum::body::Body>,
) -> (StatusCode, serde_json::Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body: bytes::Bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

fn order_body() -> serde_json::Value {
    json!({
        "client": { "new": {
            "first_name": "Ndeye",
            "last_name": "Faye",
            "telephone": "+221775554433",
            "gender": "F"
        }},
        "style": { "named": "Boubou brodé" },
        "due_date": "2025-06-12",
        "price": 500,
        "advance": 100
    })
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let h = harness().await;
    let (status, json) = h.send("GET", "/v1/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "atl-daemon");
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_or_unknown_identity_is_401() {
    let h = harness().await;
    let (status, json) = h.send("GET", "/v1/me/commandes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["kind"], "forbidden");

    let (status, _) = h
        .send("GET", "/v1/me/commandes", Some(Uuid::new_v4()), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_creates_and_employee_accepts() {
    let h = harness().await;
    let (status, json) = h
        .send("POST", "/v1/commandes", Some(h.admin), Some(order_body()))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["commande"]["status"], "EN_ATTENTE");
    assert_eq!(json["commande"]["assigned_to"], h.employee.to_string());
    assert_eq!(json["paiement"]["amount"], 100);
    let id = json["commande"]["id"].as_str().unwrap().to_string();

    let uri = format!("/v1/commandes/{id}/accept");
    let (status, json) = h.send("POST", &uri, Some(h.employee), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["commande"]["status"], "ASSIGNEE");

    // Second accept loses: the order is no longer EN_ATTENTE.
    let (status, json) = h.send("POST", &uri, Some(h.employee), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["kind"], "conflict");

    let (status, json) = h
        .send("GET", "/v1/me/commandes", Some(h.employee), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn employee_cannot_create_orders() {
    let h = harness().await;
    let (status, json) = h
        .send("POST", "/v1/commandes", Some(h.employee), Some(order_body()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["kind"], "forbidden");
    assert!(!json["error"]["message"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn advance_above_price_is_400() {
    let h = harness().await;
    let mut body = order_body();
    body["advance"] = json!(900);
    let (status, json) = h
        .send("POST", "/v1/commandes", Some(h.admin), Some(body))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn malformed_body_uses_the_error_envelope() {
    let h = harness().await;
    let (status, json) = h
        .send(
            "POST",
            "/v1/commandes",
            Some(h.admin),
            Some(json!({ "price": "beaucoup" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["kind"], "validation_error");
}

#[tokio::test]
async fn unknown_order_is_404() {
    let h = harness().await;
    let uri = format!("/v1/commandes/{}", Uuid::new_v4());
    let (status, json) = h.send("GET", &uri, Some(h.admin), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["kind"], "not_found");
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn anonymous_registration_is_employee_only() {
    let h = harness().await;
    let (status, json) = h
        .send(
            "POST",
            "/v1/users",
            None,
            Some(json!({
                "email": "Nouveau@Atelier.test",
                "first_name": "Modou",
                "last_name": "Sy"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["role"], "EMPLOYEE");
    assert_eq!(json["email"], "nouveau@atelier.test");

    let (status, _) = h
        .send(
            "POST",
            "/v1/users",
            None,
            Some(json!({
                "email": "chef@atelier.test",
                "first_name": "Aida",
                "last_name": "Mbaye",
                "role": "ADMIN"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn push_token_must_be_an_expo_token() {
    let h = harness().await;
    let uri = format!("/v1/users/{}/push-token", h.employee);
    let (status, _) = h
        .send("PATCH", &uri, Some(h.employee), Some(json!({ "token": "abc" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, json) = h
        .send(
            "PATCH",
            &uri,
            Some(h.employee),
            Some(json!({ "token": "ExponentPushToken[xyz123]" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["push_token"], "ExponentPushToken[xyz123]");
}

// ---------------------------------------------------------------------------
// GET /v1/me/stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_is_event_stream_for_known_users() {
    let h = harness().await;
    let req = Request::builder()
        .method("GET")
        .uri("/v1/me/stream")
        .header(USER_HEADER, h.employee.to_string())
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = h.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(ct.starts_with("text/event-stream"));
}
