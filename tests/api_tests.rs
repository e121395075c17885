//! JSON API routes, exercised through the router with tower's `oneshot`.

mod test_harness;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use hashfleet::api::{router, ApiState, TOKEN_HEADER};
use hashfleet::auth::{StaticAuthenticator, TokenStore};
use hashfleet::config::{UserEntry, UsersConfig};
use test_harness::TestFleet;

fn users() -> UsersConfig {
    let mut users = UsersConfig::default();
    for (name, group) in [
        ("viewer", "Read-Only"),
        ("user", "Standard User"),
        ("admin", "Administrator"),
    ] {
        users.users.insert(
            name.to_string(),
            UserEntry {
                password: format!("{}-pw", name),
                groups: vec![group.to_string()],
            },
        );
    }
    users
}

async fn create_test_app(fleet: &TestFleet) -> Router {
    router(ApiState {
        queue: fleet.queue.clone(),
        tokens: Arc::new(TokenStore::new()),
        authenticator: Arc::new(StaticAuthenticator::new(users())),
    })
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(TOKEN_HEADER, token);
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn login(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": username, "password": format!("{}-pw", username) })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_login_and_logout() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "admin", "password": "nope" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/login",
            None,
            Some(json!({ "username": "admin", "password": "admin-pw" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "Administrator");
    let token = body["token"].as_str().unwrap().to_string();

    let (status, _) = send(&app, request("GET", "/api/logout", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, request("GET", "/api/jobs", Some(&token), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_requests_need_a_token() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;

    let (status, body) = send(&app, request("GET", "/api/jobs", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);

    let (status, _) = send(&app, request("GET", "/api/tools", Some("forged"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_job_lifecycle() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;
    let token = login(&app, "user").await;
    let tool_id = fleet.timer_tool().await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/jobs",
            Some(&token),
            Some(json!({
                "toolid": tool_id,
                "name": "api timer",
                "params": { "seconds": "100000", "result": "Success" }
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let job_id = body["jobid"].as_str().unwrap().to_string();

    let uri = format!("/api/jobs/{}", job_id);
    let (status, body) = send(&app, request("GET", &uri, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert_eq!(body["owner"], "user");
    assert_eq!(body["name"], "api timer");

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&token), Some(json!({ "status": "pause" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, request("GET", &uri, Some(&token), None)).await;
    assert_eq!(body["status"], "paused");

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&token), Some(json!({ "status": "resume" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&token), Some(json!({ "status": "explode" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&token), Some(json!({ "status": "quit" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, request("GET", &uri, Some(&token), None)).await;
    assert_eq!(body["status"], "quit");

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&token), Some(json!({ "status": "pause" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, request("DELETE", &uri, Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, request("GET", &uri, Some(&token), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_tool_is_not_found() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;
    let token = login(&app, "user").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/jobs",
            Some(&token),
            Some(json!({ "toolid": uuid::Uuid::new_v4(), "name": "x" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["errors"][0].as_str().unwrap().contains("Tool not found"));
}

#[tokio::test]
async fn test_roles_gate_routes() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;
    let viewer = login(&app, "viewer").await;
    let user = login(&app, "user").await;

    let (status, body) = send(&app, request("GET", "/api/tools", Some(&viewer), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_object().unwrap().len(), 1);

    let (status, body) = send(&app, request("GET", "/api/types", Some(&viewer), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["Test"]));

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/jobs",
            Some(&viewer),
            Some(json!({ "toolid": fleet.timer_tool().await, "name": "x" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("PUT", "/api/queue", Some(&user), Some(json!({ "status": "pause" }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/resources/{}", fleet.resource_ids[0]);
    let (status, _) = send(&app, request("DELETE", &uri, Some(&user), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_queue_controls() {
    let fleet = TestFleet::new(1).await;
    let app = create_test_app(&fleet).await;
    let admin = login(&app, "admin").await;

    let a = fleet.submit(100_000, "Success").await;
    let b = fleet.submit(100_000, "Success").await;

    let (status, body) = send(
        &app,
        request(
            "PUT",
            "/api/queue",
            Some(&admin),
            Some(json!({ "order": [b.to_string()] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body["errors"].as_array().unwrap().is_empty());

    let (status, _) = send(
        &app,
        request(
            "PUT",
            "/api/queue",
            Some(&admin),
            Some(json!({ "order": [b.to_string(), a.to_string()] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, request("GET", "/api/jobs", Some(&admin), None)).await;
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![b.to_string(), a.to_string()]);

    let (status, _) = send(
        &app,
        request("PUT", "/api/queue", Some(&admin), Some(json!({ "status": "pause" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fleet.status(a).await, hashfleet::job::JobStatus::Paused);

    let (status, _) = send(
        &app,
        request("PUT", "/api/queue", Some(&admin), Some(json!({ "status": "resume" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The freed slot goes to the front of the stack.
    assert_eq!(fleet.status(b).await, hashfleet::job::JobStatus::Running);
    assert_eq!(fleet.status(a).await, hashfleet::job::JobStatus::Paused);
}

#[tokio::test]
async fn test_resource_routes() {
    let fleet = TestFleet::new(2).await;
    let app = create_test_app(&fleet).await;
    let admin = login(&app, "admin").await;
    let job = fleet.submit(100_000, "Success").await;

    let (status, body) = send(&app, request("GET", "/api/resources", Some(&admin), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let uri = format!("/api/resources/{}", fleet.resource_ids[0]);
    let (status, body) = send(&app, request("GET", &uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "resource-0");
    assert_eq!(body["status"], "active");
    assert_eq!(body["jobs"][0]["id"], job.to_string());

    let (status, _) = send(
        &app,
        request("PUT", &uri, Some(&admin), Some(json!({ "status": "pause" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, request("GET", &uri, Some(&admin), None)).await;
    assert_eq!(body["status"], "paused");

    let (status, _) = send(&app, request("DELETE", &uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, request("GET", &uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/resources",
            Some(&admin),
            Some(json!({ "address": test_harness::address(1), "name": "dup", "key": "k" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
