mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use api::auth::UserRole;
use api::{router, ApiSettings};
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{app_state, bearer, setup_db, RecordingMailer};

async fn app() -> (Router, RecordingMailer) {
    let mailer = RecordingMailer::default();
    let router = router(app_state(setup_db().await, mailer.clone()));
    (router, mailer)
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn deal_lifecycle_over_http() {
    let (app, _) = app().await;
    let admin = bearer(UserRole::Admin);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/deals",
        Some(&admin),
        Some(json!({ "title": "Acme Website", "value": 4500000, "quality_lead": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "Prospección General");
    assert_eq!(body["data"]["currency"], "CLP");
    assert_eq!(body["data"]["stage_index"], 0);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/status", id),
        Some(&admin),
        Some(json!({ "status": "Ganado" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("reason"));

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/status", id),
        Some(&admin),
        Some(json!({ "status": "Ganado", "reason": "Price accepted" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deal"]["archived"], true);
    assert_eq!(body["data"]["deal"]["reason"], "Price accepted");
    assert_eq!(body["data"]["timeline"]["history"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, Method::GET, "/api/deals", Some(&admin), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    let (_, body) = send(
        &app,
        Method::GET,
        "/api/deals?include_archived=true&q=acme",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/reopen", id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deal"]["archived"], false);
    assert_eq!(body["data"]["deal"]["status"], "Prospección General");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/reopen", id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/notes", id),
        Some(&admin),
        Some(json!({ "content": "Pidió una demo" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["author_id"].is_string());

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/deals/{}/activities", id),
        Some(&admin),
        Some(json!({ "title": "Demo", "type": "demo", "scheduled_date": "2020-01-01" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["display_status"], "overdue");
    let activity_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/activities/{}/complete", activity_id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["display_status"], "completed");

    let (status, body) = send(
        &app,
        Method::DELETE,
        &format!("/api/deals/{}", id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["history"], 2);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/api/deals/{}", id),
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn roles_gate_reads_and_writes() {
    let (app, _) = app().await;

    let (status, _) = send(&app, Method::GET, "/api/deals", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/deals",
        Some("Bearer not-a-token"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let analyst = bearer(UserRole::Analyst);
    let (status, _) = send(&app, Method::GET, "/api/deals", Some(&analyst), None).await;
    assert_eq!(status, StatusCode::OK);

    let marketing = bearer(UserRole::Marketing);
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/deals",
        Some(&marketing),
        Some(json!({ "title": "No permitido" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, Method::GET, "/api/subscribers", Some(&marketing), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, "/api/subscribers", Some(&analyst), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let owner = bearer(UserRole::Owner);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/deals",
        Some(&owner),
        Some(json!({ "title": "Permitido" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn bad_input_maps_to_client_errors() {
    let (app, _) = app().await;
    let admin = bearer(UserRole::Admin);

    let (status, body) = send(&app, Method::GET, "/api/deals/not-a-uuid", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid ID");

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/deals?status=Cerrado",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/deals",
        Some(&admin),
        Some(json!({ "title": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/deals/{}", uuid::Uuid::new_v4()),
        Some(&admin),
        Some(json!({ "title": "Fantasma" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/deals",
        Some(&admin),
        Some(json!({ "title": "Patch guard" })),
    )
    .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/deals/{}", id),
        Some(&admin),
        Some(json!({ "status": "Perdido" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subscribe_is_idempotent_and_rate_limited() {
    let (app, _) = app().await;
    let payload = json!({ "email": "Lector@Example.cl", "name": "Lector" });

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/newsletter/subscribe",
        None,
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["email"], "lector@example.cl");
    assert_eq!(body["data"]["outcome"], "created");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/newsletter/subscribe",
        None,
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "already_active");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "otro@example.cl" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/newsletter/subscribe",
        None,
        Some(json!({ "email": "cuarto@example.cl" })),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["success"], false);
}

async fn subscribe_from(
    app: &Router,
    peer: [u8; 4],
    forwarded_for: &str,
    email: &str,
) -> StatusCode {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/api/newsletter/subscribe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(json!({ "email": email }).to_string()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 51_000))));
    app.clone().oneshot(request).await.unwrap().status()
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_the_limit() {
    let (app, _) = app().await;
    let mut statuses = Vec::new();
    for n in 1..=8u8 {
        let status = subscribe_from(
            &app,
            [192, 0, 2, 10],
            &format!("203.0.113.{}", n),
            &format!("lector{}@example.cl", n),
        )
        .await;
        statuses.push(status);
    }
    assert_eq!(&statuses[..3], &[StatusCode::CREATED; 3]);
    assert!(statuses[3..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));

    let status = subscribe_from(&app, [192, 0, 2, 11], "203.0.113.1", "vecino@example.cl").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn trusted_proxy_headers_key_the_limit() {
    let mut state = app_state(setup_db().await, RecordingMailer::default());
    state.settings = Arc::new(ApiSettings {
        trust_proxy_headers: true,
        ..(*state.settings).clone()
    });
    let app = router(state);
    let proxy = [10, 0, 0, 2];

    for n in 1..=3u8 {
        let email = format!("a{}@example.cl", n);
        let status = subscribe_from(&app, proxy, "203.0.113.50", &email).await;
        assert_eq!(status, StatusCode::CREATED);
    }
    let status = subscribe_from(&app, proxy, "203.0.113.50", "a4@example.cl").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let status = subscribe_from(&app, proxy, "203.0.113.51", "b1@example.cl").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn contact_form_emails_inbox_and_opens_a_lead() {
    let (app, mailer) = app().await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/contact",
        None,
        Some(json!({
            "name": "Ana Pérez",
            "email": "ana@retail.cl",
            "company": "Retail Sur",
            "message": "Queremos automatizar la atención"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["lead_id"].is_string());
    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "hola@consultora.test");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/contact",
        None,
        Some(json!({ "name": "Sin mensaje", "email": "x@y.cl" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn health_reports_database() {
    let (app, _) = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["db_ok"], true);

    let (status, body) = send(&app, Method::GET, "/api/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}
