use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use teamline_common::types::{Task, TaskStatus};
use uuid::Uuid;

use super::AppState;
use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;
use crate::service::{CreateTaskRequest, UpdateTaskRequest};
use crate::validation::{not_blank, ValidatedJson, Validator};

#[derive(Debug, Deserialize)]
pub struct CreateTaskBody {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTaskBody {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TaskListResponse {
    data: Vec<Task>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("invalid id"))
}

impl CreateTaskBody {
    fn validate(&self) -> Result<Uuid, ApiError> {
        let mut validator = Validator::new();
        validator.check("project_id", "project_id is required", self.project_id.is_some());
        validator.check("title", "title is required", not_blank(&self.title));
        validator.check("description", "description is required", not_blank(&self.description));

        match (validator.valid(), self.project_id) {
            (true, Some(project_id)) => Ok(project_id),
            _ => Err(validator.into_error()),
        }
    }
}

impl UpdateTaskBody {
    fn validate(&self) -> Result<(), ApiError> {
        let mut validator = Validator::new();
        validator.check("title", "title is required", not_blank(&self.title));
        validator.check("description", "description is required", not_blank(&self.description));
        validator.check("status", "status is required", not_blank(&self.status));
        validator.check(
            "status",
            "status is invalid",
            TaskStatus::parse(&self.status).is_some(),
        );

        if validator.valid() {
            Ok(())
        } else {
            Err(validator.into_error())
        }
    }
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(body): ValidatedJson<CreateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = body.validate()?;

    let task = state
        .tasks
        .create(CreateTaskRequest {
            project_id,
            title: body.title,
            description: body.description,
            request_user_id: user.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = query
        .project_id
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ApiError::bad_request("project_id is required"))?;
    let project_id =
        Uuid::parse_str(project_id).map_err(|_| ApiError::bad_request("invalid project_id"))?;

    let tasks = state.tasks.list(project_id, user.user_id).await?;
    Ok(Json(TaskListResponse { data: tasks }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let task = state.tasks.get_by_id(id, user.user_id).await?;
    Ok(Json(task))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateTaskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    body.validate()?;

    let task = state
        .tasks
        .update(UpdateTaskRequest {
            task_id: id,
            title: body.title,
            description: body.description,
            status: body.status,
            request_user_id: user.user_id,
        })
        .await?;

    Ok(Json(task))
}
