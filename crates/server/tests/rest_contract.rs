// REST contract tests over the full router with in-memory stores.
//
// The app under test runs the real subscriber pipelines on the
// in-process event log, so side effects (chat bootstrap) are observable
// through the HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        Method, Request, Response, StatusCode,
    },
    Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use teamline_server::api::AppState;
use teamline_server::auth::jwt::TokenService;
use teamline_server::bus::{EventLog, Publisher, Subscriber};
use teamline_server::build_app;
use teamline_server::pipeline::{
    ChatPipeline, TaskPipeline, CHAT_SUBSCRIBER_GROUP, TASK_SUBSCRIBER_GROUP,
};
use teamline_server::service::{ChatService, ProjectService, TaskService, UserService};
use teamline_server::store::{ChatStore, ProjectStore, TaskStore, UserStore};
use teamline_server::ws::Hub;

const REFRESH_COOKIE: &str = "project_chat_refresh_token";

struct TestApp {
    router: Router,
    _shutdown: CancellationToken,
}

fn test_app() -> TestApp {
    let log = EventLog::new(1);
    let publisher = Publisher::new(log.clone());
    let tokens = Arc::new(TokenService::new("SECRET"));

    let users = UserStore::memory();
    let projects = ProjectStore::memory();
    let tasks = TaskStore::memory();
    let chats = ChatStore::memory();

    let chat_service = ChatService::new(chats, users.clone(), publisher.clone());
    let project_service = ProjectService::new(projects.clone(), users.clone(), publisher.clone());
    let task_service = TaskService::new(tasks, projects, users.clone(), publisher.clone());
    let user_service = UserService::new(tokens.clone(), users);

    let hub = Hub::new(chat_service.clone(), project_service.clone(), publisher.clone());

    let shutdown = CancellationToken::new();
    let chat_subscriber = Subscriber::new(log.clone(), CHAT_SUBSCRIBER_GROUP, shutdown.clone());
    ChatPipeline::new(chat_service.clone(), hub.clone()).run(&chat_subscriber);
    let task_subscriber = Subscriber::new(log, TASK_SUBSCRIBER_GROUP, shutdown.clone());
    TaskPipeline::new(hub.clone()).run(&task_subscriber);

    let state = AppState {
        tokens,
        users: user_service,
        projects: project_service,
        tasks: task_service,
        chats: chat_service,
    };

    TestApp { router: build_app(state, hub, &["http://localhost:3000".to_string()]), _shutdown: shutdown }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn authed_json_request(method: Method, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .expect("request should build")
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body should read");
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}

fn refresh_cookie_of(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_COOKIE)
        .map(|(_, value)| value.to_string())
}

async fn signup(app: &Router, name: &str, email: &str) {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/users",
            json!({ "name": name, "email": email, "password": "password123" }),
        ))
        .await
        .expect("signup should complete");
    assert_eq!(response.status(), StatusCode::CREATED);
}

async fn login(app: &Router, email: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/auth/login",
            json!({ "email": email, "password": "password123" }),
        ))
        .await
        .expect("login should complete");
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = refresh_cookie_of(&response).expect("login should set refresh cookie");
    let body = body_json(response).await;
    let access = body["access_token"].as_str().expect("access token should be present");
    (access.to_string(), cookie)
}

#[tokio::test]
async fn signup_validation_reports_per_field_errors() {
    let app = test_app().router;

    let response = app
        .oneshot(json_request(Method::POST, "/users", json!({ "email": "not-an-email" })))
        .await
        .expect("request should complete");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["status"], 422);
    assert_eq!(body["message"], "Validation Failed");
    assert_eq!(body["meta"]["name"][0], "name is required");
    assert_eq!(body["meta"]["email"][0], "email is invalid");
    assert_eq!(body["meta"]["password"][0], "password is required");
}

#[tokio::test]
async fn signup_never_returns_the_password_and_rejects_duplicates() {
    let app = test_app().router;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/users",
            json!({ "name": "A", "email": "a@b.c", "password": "password123" }),
        ))
        .await
        .expect("signup should complete");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["email"], "a@b.c");
    assert!(body.get("password").is_none());

    let duplicate = app
        .oneshot(json_request(
            Method::POST,
            "/users",
            json!({ "name": "A2", "email": "a@b.c", "password": "password123" }),
        ))
        .await
        .expect("duplicate signup should complete");
    assert_eq!(duplicate.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(duplicate).await;
    assert_eq!(body["message"], "user email is already taken");
}

#[tokio::test]
async fn login_refresh_cycle_rotates_and_burns_tokens() {
    let app = test_app().router;
    signup(&app, "A", "a@b.c").await;

    // Bad credentials are rejected uniformly.
    let bad = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/auth/login",
            json!({ "email": "a@b.c", "password": "wrong-password" }),
        ))
        .await
        .expect("login should complete");
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(bad).await["message"], "invalid credentials");

    let (_access, first_cookie) = login(&app, "a@b.c").await;

    // Refresh with the cookie only, empty body.
    let refreshed = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/refresh-token")
                .header(COOKIE, format!("{REFRESH_COOKIE}={first_cookie}"))
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("refresh should complete");
    assert_eq!(refreshed.status(), StatusCode::OK);
    let second_cookie = refresh_cookie_of(&refreshed).expect("refresh should rotate the cookie");
    assert_ne!(second_cookie, first_cookie);
    let body = body_json(refreshed).await;
    assert!(body["access_token"].as_str().is_some());
    assert_eq!(body["user"]["email"], "a@b.c");

    // Replaying the first cookie is reuse: 401 and the cookie clears.
    let replayed = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/refresh-token")
                .header(COOKIE, format!("{REFRESH_COOKIE}={first_cookie}"))
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("refresh should complete");
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(refresh_cookie_of(&replayed).as_deref(), Some(""));

    // Missing cookie entirely.
    let missing = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/auth/refresh-token")
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
        .expect("refresh should complete");
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_requires_a_bearer_token() {
    let app = test_app().router;
    signup(&app, "A", "a@b.c").await;
    let (access, _) = login(&app, "a@b.c").await;

    let anonymous = app
        .clone()
        .oneshot(Request::builder().uri("/users/me").body(Body::empty()).unwrap())
        .await
        .expect("request should complete");
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let me = app
        .oneshot(authed_get("/users/me", &access))
        .await
        .expect("request should complete");
    assert_eq!(me.status(), StatusCode::OK);
    assert_eq!(body_json(me).await["email"], "a@b.c");
}

#[tokio::test]
async fn project_crud_enforces_ownership_and_membership() {
    let app = test_app().router;
    signup(&app, "Owner", "owner@b.c").await;
    signup(&app, "Member", "member@b.c").await;
    signup(&app, "Outsider", "outsider@b.c").await;
    let (owner, _) = login(&app, "owner@b.c").await;
    let (member, _) = login(&app, "member@b.c").await;
    let (outsider, _) = login(&app, "outsider@b.c").await;

    let created = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/projects",
            &owner,
            json!({ "name": "alpha", "description": "first" }),
        ))
        .await
        .expect("create should complete");
    assert_eq!(created.status(), StatusCode::CREATED);
    let project = body_json(created).await;
    let project_id = project["id"].as_str().expect("project id should be present").to_string();
    assert_eq!(project["members"][0]["role"], "creator");

    // Invalid path id.
    let invalid = app
        .clone()
        .oneshot(authed_get("/projects/not-a-uuid", &owner))
        .await
        .expect("request should complete");
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    // Non-members are forbidden.
    let forbidden = app
        .clone()
        .oneshot(authed_get(&format!("/projects/{project_id}"), &outsider))
        .await
        .expect("request should complete");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    // Self-add is a business-validation failure.
    let self_add = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            &format!("/projects/{project_id}/members"),
            &owner,
            json!({ "email": "owner@b.c" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(self_add.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(self_add).await["message"], "you cannot add yourself as a member");

    // Owner adds a member.
    let added = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            &format!("/projects/{project_id}/members"),
            &owner,
            json!({ "email": "member@b.c" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(added.status(), StatusCode::CREATED);
    let member_body = body_json(added).await;
    assert_eq!(member_body["role"], "member");
    assert_eq!(member_body["project_id"].as_str(), Some(project_id.as_str()));

    // Adding twice is a duplicate.
    let duplicate = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            &format!("/projects/{project_id}/members"),
            &owner,
            json!({ "email": "member@b.c" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(duplicate.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(duplicate).await["message"], "member already exists");

    // Members can read but not update.
    let read = app
        .clone()
        .oneshot(authed_get(&format!("/projects/{project_id}"), &member))
        .await
        .expect("request should complete");
    assert_eq!(read.status(), StatusCode::OK);

    let update = app
        .clone()
        .oneshot(authed_json_request(
            Method::PUT,
            &format!("/projects/{project_id}"),
            &member,
            json!({ "name": "beta", "description": "second" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(update.status(), StatusCode::FORBIDDEN);

    let update = app
        .oneshot(authed_json_request(
            Method::PUT,
            &format!("/projects/{project_id}"),
            &owner,
            json!({ "name": "beta", "description": "second" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(update.status(), StatusCode::OK);
    assert_eq!(body_json(update).await["name"], "beta");
}

#[tokio::test]
async fn task_endpoints_enforce_membership_and_status_rules() {
    let app = test_app().router;
    signup(&app, "Owner", "owner@b.c").await;
    signup(&app, "Outsider", "outsider@b.c").await;
    let (owner, _) = login(&app, "owner@b.c").await;
    let (outsider, _) = login(&app, "outsider@b.c").await;

    let created = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/projects",
            &owner,
            json!({ "name": "alpha", "description": "first" }),
        ))
        .await
        .expect("create should complete");
    let project_id = body_json(created).await["id"].as_str().unwrap().to_string();

    // Missing project_id in the query is a bad request.
    let missing = app
        .clone()
        .oneshot(authed_get("/tasks", &owner))
        .await
        .expect("request should complete");
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let task = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/tasks",
            &owner,
            json!({ "project_id": project_id, "title": "write docs", "description": "user guide" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(task.status(), StatusCode::CREATED);
    let task = body_json(task).await;
    assert_eq!(task["status"], "pending");
    let task_id = task["id"].as_str().unwrap().to_string();

    // Outsiders cannot create tasks in the project.
    let forbidden = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/tasks",
            &outsider,
            json!({ "project_id": project_id, "title": "t", "description": "d" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    // Invalid status fails validation with per-field detail.
    let invalid = app
        .clone()
        .oneshot(authed_json_request(
            Method::PUT,
            &format!("/tasks/{task_id}"),
            &owner,
            json!({ "title": "write docs", "description": "user guide", "status": "blocked" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(invalid).await["meta"]["status"][0], "status is invalid");

    let updated = app
        .clone()
        .oneshot(authed_json_request(
            Method::PUT,
            &format!("/tasks/{task_id}"),
            &owner,
            json!({ "title": "write docs", "description": "user guide", "status": "doing" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(updated.status(), StatusCode::OK);
    let updated = body_json(updated).await;
    assert_eq!(updated["status"], "doing");
    // Creation audit row plus the status change.
    assert_eq!(updated["changes"].as_array().map(Vec::len), Some(2));

    let listed = app
        .oneshot(authed_get(&format!("/tasks?project_id={project_id}"), &owner))
        .await
        .expect("request should complete");
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = body_json(listed).await;
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn project_creation_bootstraps_its_chat() {
    let app = test_app().router;
    signup(&app, "Owner", "owner@b.c").await;
    let (owner, _) = login(&app, "owner@b.c").await;

    let created = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/projects",
            &owner,
            json!({ "name": "alpha", "description": "first" }),
        ))
        .await
        .expect("create should complete");
    let project_id = body_json(created).await["id"].as_str().unwrap().to_string();

    // The chat subscriber bootstraps the chat asynchronously.
    let mut chat = None;
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(authed_get(&format!("/chats/{project_id}"), &owner))
            .await
            .expect("request should complete");
        if response.status() == StatusCode::OK {
            chat = Some(body_json(response).await);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let chat = chat.expect("chat should be bootstrapped within the subscriber latency");
    assert_eq!(chat["project_id"].as_str(), Some(project_id.as_str()));
    assert_eq!(chat["members"].as_array().map(Vec::len), Some(1));

    // Posting a message into the chat works for the member.
    let chat_id = chat["id"].as_str().unwrap().to_string();
    let message = app
        .clone()
        .oneshot(authed_json_request(
            Method::POST,
            "/chats/messages",
            &owner,
            json!({ "chat_id": chat_id, "content": "hello" }),
        ))
        .await
        .expect("request should complete");
    assert_eq!(message.status(), StatusCode::CREATED);
    let message = body_json(message).await;
    assert_eq!(message["message_type"], "text");

    // And shows up in the paginated listing.
    let listed = app
        .oneshot(authed_get(&format!("/chats/{project_id}/messages?limit=10"), &owner))
        .await
        .expect("request should complete");
    assert_eq!(listed.status(), StatusCode::OK);
    let listed = body_json(listed).await;
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(listed["data"][0]["content"], "hello");
}
