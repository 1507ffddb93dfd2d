//! Integration tests for gighub-api endpoints
//!
//! Each test builds the router over a fresh in-memory database and drives it
//! with `oneshot`, so no socket is opened.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

use gighub_api::{build_router, AppState};
use gighub_common::db::{init_memory_pool, Meeting, Platform};
use gighub_common::events::{EventBus, HubEvent};
use gighub_services::calendar::{CalendarError, CalendarSync};
use gighub_services::platforms::{
    OAuthToken, PlatformClient, PlatformError, PlatformRegistry, RemoteProfile, RemoteProject,
};

async fn setup_state() -> AppState {
    let db = init_memory_pool().await.expect("Should create in-memory database");
    AppState::new(db, EventBus::new(100))
}

fn app(state: &AppState) -> Router {
    build_router(state.clone())
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    builder.body(body).unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Send a request and return status plus parsed body (Null when empty)
async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
    let response = app(state).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn register_request(name: &str, email: &str) -> Request<Body> {
    request(
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "name": name,
            "email": email,
            "password": "correct-horse",
            "password_confirmation": "correct-horse",
        })),
    )
}

/// Register a user and return (token, user id)
async fn register(state: &AppState, name: &str, email: &str) -> (String, i64) {
    let (status, body) = send(state, register_request(name, email)).await;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    (
        body["token"].as_str().unwrap().to_string(),
        body["user"]["id"].as_i64().unwrap(),
    )
}

async fn job_kinds(state: &AppState) -> Vec<String> {
    sqlx::query_scalar("SELECT kind FROM jobs ORDER BY id")
        .fetch_all(&state.db)
        .await
        .unwrap()
}

// =============================================================================
// Health and authentication
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let state = setup_state().await;
    let response = app(&state).oneshot(request("GET", "/health", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "gighub-api");
    assert_eq!(body["queue"]["ai_pending"], 0);
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let state = setup_state().await;

    let (status, body) = send(&state, request("GET", "/api/workflows", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Unauthenticated.");

    let (status, _) = send(&state, request("GET", "/api/workflows", Some("bogus"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_route_is_not_unauthorized() {
    let state = setup_state().await;
    let (status, _) = send(&state, request("GET", "/api/nothing-here", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_first_user_is_admin_and_logout_revokes_token() {
    let state = setup_state().await;
    let (first, _) = register(&state, "Ana", "ana@example.com").await;
    let (second, _) = register(&state, "Bo", "bo@example.com").await;

    let (_, me) = send(&state, request("GET", "/api/auth/me", Some(&first), None)).await;
    assert_eq!(me["is_admin"], true);
    assert!(me.get("password_hash").is_none());

    let (_, me) = send(&state, request("GET", "/api/auth/me", Some(&second), None)).await;
    assert_eq!(me["is_admin"], false);

    let (status, _) = send(&state, request("POST", "/api/auth/logout", Some(&second), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&state, request("GET", "/api/auth/me", Some(&second), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_concurrent_registrations() {
    let state = setup_state().await;

    // Same email: the loser gets a field error whether the lookup or the
    // unique index catches it
    let (a, b) = tokio::join!(
        send(&state, register_request("Ana", "ana@example.com")),
        send(&state, register_request("Ana 2", "ana@example.com")),
    );
    assert!(
        (a.0, b.0) == (StatusCode::CREATED, StatusCode::UNPROCESSABLE_ENTITY)
            || (a.0, b.0) == (StatusCode::UNPROCESSABLE_ENTITY, StatusCode::CREATED),
        "{:?} {:?}",
        a,
        b
    );
    let rejected = if a.0 == StatusCode::CREATED { b.1 } else { a.1 };
    assert_eq!(rejected["errors"]["email"][0], "The email has already been taken.");

    let (c, d) = tokio::join!(
        send(&state, register_request("Bo", "bo@example.com")),
        send(&state, register_request("Cy", "cy@example.com")),
    );
    assert_eq!(c.0, StatusCode::CREATED);
    assert_eq!(d.0, StatusCode::CREATED);

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_admin")
        .fetch_one(&state.db)
        .await
        .unwrap();
    assert_eq!(admins, 1);
}

#[tokio::test]
async fn test_register_duplicate_email_and_bad_login() {
    let state = setup_state().await;
    register(&state, "Ana", "ana@example.com").await;

    let (status, body) = send(
        &state,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "name": "Other",
                "email": "ANA@example.com",
                "password": "correct-horse",
                "password_confirmation": "correct-horse",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["email"].is_array());

    let (status, body) = send(
        &state,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@example.com", "password": "wrong-password"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["email"].is_array());

    let (status, body) = send(
        &state,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "ana@example.com", "password": "correct-horse"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
}

// =============================================================================
// Workflows
// =============================================================================

#[tokio::test]
async fn test_workflow_requires_title() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;

    let (status, body) = send(
        &state,
        request("POST", "/api/workflows", Some(&token), Some(json!({"description": "x"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["title"].is_array());
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_workflow_with_template_queues_processing() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;

    let template = json!({
        "name": "Lead capture",
        "nodes": [
            {"name": "Hook", "type": "n8n-nodes-base.webhook", "parameters": {}},
            {"name": "Sheet", "type": "n8n-nodes-base.googleSheets", "parameters": {}}
        ],
        "connections": {}
    });
    let (status, body) = send(
        &state,
        request(
            "POST",
            "/api/workflows",
            Some(&token),
            Some(json!({"title": "Lead capture", "template": template})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["ai_status"], "pending");
    assert_eq!(job_kinds(&state).await, vec!["ProcessN8nWorkflow"]);

    let id = body["id"].as_i64().unwrap();
    let (status, body) = send(
        &state,
        request(
            "POST",
            &format!("/api/workflows/{}/regenerate", id),
            Some(&token),
            Some(json!({"sections": ["faqs", "faqs", "seo"]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["sections"], json!(["faqs", "seo"]));
    assert_eq!(
        job_kinds(&state).await,
        vec!["ProcessN8nWorkflow", "RegenerateWorkflowAiContent"]
    );
}

#[tokio::test]
async fn test_workflow_invalid_template_rejected() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;

    let (status, body) = send(
        &state,
        request(
            "POST",
            "/api/workflows",
            Some(&token),
            Some(json!({"title": "Broken", "template": {"name": "no nodes"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["template"].is_array());
    assert!(job_kinds(&state).await.is_empty());
}

#[tokio::test]
async fn test_regenerate_without_body_means_all_sections() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;
    let (_, body) = send(
        &state,
        request("POST", "/api/workflows", Some(&token), Some(json!({"title": "Plain"}))),
    )
    .await;
    let id = body["id"].as_i64().unwrap();

    let (status, body) = send(
        &state,
        request("POST", &format!("/api/workflows/{}/regenerate", id), Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["sections"], json!(["seo", "blog_post", "faqs"]));
}

#[tokio::test]
async fn test_unknown_ids_return_404() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;

    for uri in [
        "/api/workflows/999",
        "/api/companies/999",
        "/api/jobs/999",
        "/api/candidates/999",
        "/api/templates/999",
        "/api/meetings/no-such-room",
    ] {
        let (status, body) = send(&state, request("GET", uri, Some(&token), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert!(body["message"].as_str().unwrap().ends_with("not found."), "{}", uri);
    }
}

#[tokio::test]
async fn test_malformed_requests_get_json_errors() {
    let state = setup_state().await;
    let (token, _) = register(&state, "Ana", "ana@example.com").await;

    let (status, body) = send(
        &state,
        request("POST", "/api/workflows", Some(&token), Some(json!({"title": 5}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["title"][0].as_str().unwrap().contains("invalid type"));

    let (status, body) = send(&state, request("GET", "/api/workflows/abc", Some(&token), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].is_string());

    let req = Request::builder()
        .method("POST")
        .uri("/api/workflows")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"title\": "))
        .unwrap();
    let (status, body) = send(&state, req).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["body"].is_array());

    let (status, body) = send(&state, request("GET", "/api/workflows?per_page=abc", Some(&token), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["query"].is_array());
}

// =============================================================================
// Companies, jobs, templates
// =============================================================================

#[tokio::test]
async fn test_company_owner_rules_and_job_salary_range() {
    let state = setup_state().await;
    let (owner, _) = register(&state, "Ana", "ana@example.com").await;
    let (other, _) = register(&state, "Bo", "bo@example.com").await;

    let (status, company) = send(
        &state,
        request("POST", "/api/companies", Some(&owner), Some(json!({"name": "Acme"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let company_id = company["id"].as_i64().unwrap();

    // Names are unique regardless of case
    let (status, body) = send(
        &state,
        request("POST", "/api/companies", Some(&other), Some(json!({"name": "ACME"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["name"].is_array());

    let (status, _) = send(
        &state,
        request(
            "PUT",
            &format!("/api/companies/{}", company_id),
            Some(&other),
            Some(json!({"name": "Hijacked"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let job = json!({
        "company_id": company_id,
        "title": "Rust engineer",
        "description": "Build things",
        "employment_type": "contract",
        "salary_min": 9000,
        "salary_max": 5000,
    });
    let (status, body) = send(&state, request("POST", "/api/jobs", Some(&owner), Some(job.clone()))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["salary_max"].is_array());

    let mut ok = job.clone();
    ok["salary_max"] = json!(12000);
    let (status, _) = send(&state, request("POST", "/api/jobs", Some(&other), Some(ok.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = send(&state, request("POST", "/api/jobs", Some(&owner), Some(ok))).await;
    assert_eq!(status, StatusCode::CREATED);

    // Partial update is checked against the stored minimum
    let (status, _) = send(
        &state,
        request(
            "PUT",
            &format!("/api/jobs/{}", created["id"]),
            Some(&owner),
            Some(json!({"salary_max": 100})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_templates_are_admin_only() {
    let state = setup_state().await;
    let (admin, _) = register(&state, "Ana", "ana@example.com").await;
    let (member, _) = register(&state, "Bo", "bo@example.com").await;

    let template = json!({"name": "Proposal", "body": "Hello {{client}}"});
    let (status, body) = send(&state, request("POST", "/api/templates", Some(&member), Some(template.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "This action is unauthorized.");

    let (status, _) = send(&state, request("POST", "/api/templates", Some(&admin), Some(template))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&state, request("GET", "/api/templates", Some(&member), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
    assert_eq!(body["meta"]["per_page"], 15);
}

// =============================================================================
// Chat and broadcasting
// =============================================================================

#[tokio::test]
async fn test_chat_message_flow_and_channel_auth() {
    let state = setup_state().await;
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;
    let (bo, bo_id) = register(&state, "Bo", "bo@example.com").await;
    let (outsider, outsider_id) = register(&state, "Cy", "cy@example.com").await;

    let (status, channel) = send(
        &state,
        request(
            "POST",
            "/api/channels",
            Some(&ana),
            Some(json!({"name": "general", "member_ids": [bo_id]})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uuid = channel["uuid"].as_str().unwrap().to_string();
    assert_eq!(channel["member_ids"].as_array().unwrap().len(), 2);

    let mut events = state.event_bus.subscribe();

    let (status, message) = send(
        &state,
        request(
            "POST",
            &format!("/api/channels/{}/messages", uuid),
            Some(&bo),
            Some(json!({"body": "hello team"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(message["user_name"], "Bo");

    match events.try_recv().unwrap() {
        HubEvent::MessageSent { channel_uuid, message } => {
            assert_eq!(channel_uuid, uuid);
            assert_eq!(message.body, "hello team");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let (status, _) = send(
        &state,
        request(
            "POST",
            &format!("/api/channels/{}/messages", uuid),
            Some(&outsider),
            Some(json!({"body": "let me in"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Read receipts are broadcast once
    let read_uri = format!("/api/channels/{}/messages/{}/read", uuid, message["id"]);
    let (status, _) = send(&state, request("POST", &read_uri, Some(&ana), None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&state, request("POST", &read_uri, Some(&ana), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(matches!(events.try_recv(), Ok(HubEvent::MessageRead { .. })));
    assert!(events.try_recv().is_err());

    let channel_name = format!("team.channel.{}", uuid);
    let (status, body) = send(
        &state,
        request("POST", "/broadcasting/auth", Some(&bo), Some(json!({"channel_name": channel_name}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["authorized"], true);

    for (token, name) in [
        (&outsider, channel_name.clone()),
        (&bo, format!("user.{}", outsider_id)),
        (&bo, "not-a-channel".to_string()),
    ] {
        let (status, _) = send(
            &state,
            request("POST", "/broadcasting/auth", Some(token), Some(json!({"channel_name": name}))),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", name);
    }

    let (status, _) = send(
        &state,
        request(
            "POST",
            "/broadcasting/auth",
            Some(&outsider),
            Some(json!({"channel_name": "workflows"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_sse_subscription_accepts_query_token() {
    let state = setup_state().await;
    let (token, id) = register(&state, "Ana", "ana@example.com").await;

    let uri = format!("/broadcasting/user.{}?token={}", id, token);
    let response = app(&state).oneshot(request("GET", &uri, None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
}

// =============================================================================
// Meetings
// =============================================================================

struct FailingCalendar;

#[async_trait]
impl CalendarSync for FailingCalendar {
    async fn create_event(&self, _meeting: &Meeting, _attendees: &[String]) -> Result<Option<String>, CalendarError> {
        Err(CalendarError::Network("connection refused".to_string()))
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), CalendarError> {
        Err(CalendarError::Network("connection refused".to_string()))
    }
}

struct FixedCalendar;

#[async_trait]
impl CalendarSync for FixedCalendar {
    async fn create_event(&self, _meeting: &Meeting, attendees: &[String]) -> Result<Option<String>, CalendarError> {
        Ok(Some(format!("evt-{}", attendees.len())))
    }

    async fn delete_event(&self, _event_id: &str) -> Result<(), CalendarError> {
        Ok(())
    }
}

fn meeting_body() -> Value {
    json!({
        "title": "Kickoff",
        "starts_at": "2030-01-01T10:00:00Z",
        "ends_at": "2030-01-01T11:00:00Z",
        "attendees": ["bo@example.com", "guest@elsewhere.com"],
    })
}

#[tokio::test]
async fn test_meeting_saved_when_calendar_sync_fails() {
    let state = setup_state().await.with_calendar(Arc::new(FailingCalendar));
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;
    let (bo, bo_id) = register(&state, "Bo", "bo@example.com").await;

    let mut events = state.event_bus.subscribe();
    let (status, body) = send(&state, request("POST", "/api/meetings", Some(&ana), Some(meeting_body()))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert!(body["calendar_event_id"].is_null());
    assert_eq!(body["attendees"].as_array().unwrap().len(), 2);

    match events.try_recv().unwrap() {
        HubEvent::UserNotification { user_id, kind, .. } => {
            assert_eq!(user_id, bo_id);
            assert_eq!(kind, "meeting_invite");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let room = body["room_id"].as_str().unwrap().to_string();
    let (status, _) = send(&state, request("GET", &format!("/api/meetings/{}", room), Some(&bo), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&state, request("DELETE", &format!("/api/meetings/{}", room), Some(&bo), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&state, request("DELETE", &format!("/api/meetings/{}", room), Some(&ana), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_meeting_stores_calendar_event_and_relays_signals() {
    let state = setup_state().await.with_calendar(Arc::new(FixedCalendar));
    let (ana, ana_id) = register(&state, "Ana", "ana@example.com").await;
    let (bo, _) = register(&state, "Bo", "bo@example.com").await;
    let (outsider, _) = register(&state, "Cy", "cy@example.com").await;

    let (status, body) = send(&state, request("POST", "/api/meetings", Some(&ana), Some(meeting_body()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["calendar_event_id"], "evt-2");
    let room = body["room_id"].as_str().unwrap().to_string();

    let mut events = state.event_bus.subscribe();
    let signal_uri = format!("/api/meetings/{}/signal", room);
    let (status, _) = send(
        &state,
        request(
            "POST",
            &signal_uri,
            Some(&bo),
            Some(json!({"type": "offer", "payload": {"sdp": "v=0"}, "to_user_id": ana_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    match events.try_recv().unwrap() {
        HubEvent::MeetingSignal { room_id, to_user_id, signal_type, .. } => {
            assert_eq!(room_id, room);
            assert_eq!(to_user_id, Some(ana_id));
            assert_eq!(signal_type, "offer");
        }
        other => panic!("unexpected event {:?}", other),
    }

    let (status, _) = send(
        &state,
        request("POST", &signal_uri, Some(&outsider), Some(json!({"type": "offer"}))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &state,
        request(
            "POST",
            "/broadcasting/auth",
            Some(&bo),
            Some(json!({"channel_name": format!("meeting.{}", room)})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

/// Next SSE frame as text
async fn next_sse_frame(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
        .await
        .expect("Should receive an SSE frame")
        .expect("Stream should stay open")
        .expect("Frame should not error");
    let data = frame.into_data().expect("Should be a data frame");
    String::from_utf8(data.to_vec()).unwrap()
}

#[tokio::test]
async fn test_targeted_signal_reaches_only_its_addressee() {
    let state = setup_state().await;
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;
    let (bo, bo_id) = register(&state, "Bo", "bo@example.com").await;
    let (cy, cy_id) = register(&state, "Cy", "guest@elsewhere.com").await;

    let (status, body) = send(&state, request("POST", "/api/meetings", Some(&ana), Some(meeting_body()))).await;
    assert_eq!(status, StatusCode::CREATED);
    let room = body["room_id"].as_str().unwrap().to_string();

    let mut streams = Vec::new();
    for (token, id) in [(&bo, bo_id), (&cy, cy_id)] {
        let uri = format!("/broadcasting/meeting.{}?token={}", room, token);
        let response = app(&state).oneshot(request("GET", &uri, None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "user {}", id);
        let mut body = response.into_body();
        assert!(next_sse_frame(&mut body).await.contains("ConnectionStatus"));
        streams.push(body);
    }

    let signal_uri = format!("/api/meetings/{}/signal", room);
    let (status, _) = send(
        &state,
        request("POST", &signal_uri, Some(&ana), Some(json!({"type": "offer", "to_user_id": bo_id}))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = send(&state, request("POST", &signal_uri, Some(&ana), Some(json!({"type": "join"})))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let bo_frame = next_sse_frame(&mut streams[0]).await;
    assert!(bo_frame.contains("\"offer\""), "{}", bo_frame);

    let cy_frame = next_sse_frame(&mut streams[1]).await;
    assert!(cy_frame.contains("\"join\""), "{}", cy_frame);
    assert!(!cy_frame.contains("\"offer\""), "{}", cy_frame);
}

#[tokio::test]
async fn test_meeting_end_must_follow_start() {
    let state = setup_state().await;
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;

    let mut body = meeting_body();
    body["ends_at"] = json!("2030-01-01T09:00:00Z");
    let (status, body) = send(&state, request("POST", "/api/meetings", Some(&ana), Some(body))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["ends_at"].is_array());
}

// =============================================================================
// Platforms
// =============================================================================

struct FakeUpwork;

#[async_trait]
impl PlatformClient for FakeUpwork {
    fn platform(&self) -> Platform {
        Platform::Upwork
    }

    fn authorize_url(&self, state: &str) -> Result<String, PlatformError> {
        Ok(format!("https://upwork.test/authorize?state={}", state))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthToken, PlatformError> {
        Ok(OAuthToken {
            access_token: format!("access-{}", code),
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
        })
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<OAuthToken, PlatformError> {
        Err(PlatformError::Unauthorized)
    }

    async fn fetch_profile(&self, _access_token: &str) -> Result<RemoteProfile, PlatformError> {
        Ok(RemoteProfile {
            external_id: "ext-42".to_string(),
            username: Some("freelancer42".to_string()),
            display_name: None,
        })
    }

    async fn fetch_projects(&self, _access_token: &str) -> Result<Vec<RemoteProject>, PlatformError> {
        Ok(Vec::new())
    }
}

async fn connect_state(state: &AppState, token: &str) -> String {
    let (status, body) = send(state, request("GET", "/api/platforms/upwork/connect", Some(token), None)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body["url"].as_str().unwrap().starts_with("https://upwork.test/"));
    body["state"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_oauth_callback_links_account_once() {
    let state = setup_state()
        .await
        .with_platforms(PlatformRegistry::new().with(Arc::new(FakeUpwork)));
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;
    let (bo, _) = register(&state, "Bo", "bo@example.com").await;

    let oauth_state = connect_state(&state, &ana).await;
    let callback = format!("/api/platforms/upwork/callback?code=abc&state={}", oauth_state);
    let (status, body) = send(&state, request("GET", &callback, None, None)).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["account"]["external_id"], "ext-42");
    assert_eq!(job_kinds(&state).await, vec!["SyncPlatformAccount"]);

    // State is single use
    let (status, body) = send(&state, request("GET", &callback, None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or expired state.");

    // Same remote identity for another user
    let oauth_state = connect_state(&state, &bo).await;
    let callback = format!("/api/platforms/upwork/callback?code=xyz&state={}", oauth_state);
    let (status, _) = send(&state, request("GET", &callback, None, None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_platform_errors() {
    let state = setup_state().await;
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;

    let (status, _) = send(&state, request("GET", "/api/platforms/behance/connect", Some(&ana), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Not configured
    let (status, body) = send(&state, request("GET", "/api/platforms/upwork/connect", Some(&ana), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]["platform"].is_array());

    let (status, _) = send(
        &state,
        request("GET", "/api/platforms/upwork/callback?error=access_denied", None, None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_fiverr_link_and_sync_rules() {
    let state = setup_state().await;
    let (ana, _) = register(&state, "Ana", "ana@example.com").await;
    let (bo, _) = register(&state, "Bo", "bo@example.com").await;

    let (status, body) = send(
        &state,
        request("POST", "/api/platforms/fiverr", Some(&ana), Some(json!({"username": "@Ana_Designs"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let account_id = body["account"]["id"].as_i64().unwrap();

    let (status, _) = send(
        &state,
        request("POST", "/api/platforms/fiverr", Some(&bo), Some(json!({"username": "ana_designs"}))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &state,
        request("POST", "/api/platforms/fiverr", Some(&bo), Some(json!({"username": "bad name!"}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let sync_uri = format!("/api/platform-accounts/{}/sync", account_id);
    let (status, _) = send(&state, request("POST", &sync_uri, Some(&ana), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = send(&state, request("DELETE", &format!("/api/platform-accounts/{}", account_id), Some(&bo), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&state, request("DELETE", &format!("/api/platform-accounts/{}", account_id), Some(&ana), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
