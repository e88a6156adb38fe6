// HTTP API: route table and shared handler state.

pub mod auth;
pub mod chats;
pub mod projects;
pub mod tasks;
pub mod users;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::jwt::TokenService;
use crate::auth::middleware::{identify_user, require_auth};
use crate::service::{ChatService, ProjectService, TaskService, UserService};
use crate::ws::{self, Hub};

#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub users: UserService,
    pub projects: ProjectService,
    pub tasks: TaskService,
    pub chats: ChatService,
}

pub fn router(state: AppState, hub: Hub) -> Router {
    let public = Router::new()
        .route("/users", post(users::create))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh-token", post(auth::refresh_token));

    let protected = Router::new()
        .route("/users/me", get(users::me))
        .route("/projects", post(projects::create).get(projects::list))
        .route("/projects/{id}", get(projects::get).put(projects::update))
        .route("/projects/{id}/members", post(projects::create_member))
        .route("/tasks", post(tasks::create).get(tasks::list))
        .route("/tasks/{id}", get(tasks::get).put(tasks::update))
        .route("/chats/{project_id}", get(chats::get_by_project))
        .route("/chats/{project_id}/messages", get(chats::list_messages))
        .route("/chats/messages", post(chats::create_message))
        .route_layer(middleware::from_fn(require_auth));

    let tokens = state.tokens.clone();
    let ws_router = ws::router(hub, tokens.clone());

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
        .merge(ws_router)
        .layer(middleware::from_fn_with_state(tokens, identify_user))
}
