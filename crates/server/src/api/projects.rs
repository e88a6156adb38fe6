use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use teamline_common::types::ProjectMemberRole;
use uuid::Uuid;

use super::AppState;
use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;
use crate::service::{CreateMemberRequest, CreateProjectRequest, UpdateProjectRequest};
use crate::validation::{not_blank, valid_email, ValidatedJson, Validator};

#[derive(Debug, Deserialize)]
pub struct ProjectBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl ProjectBody {
    fn validate(&self) -> Result<(), ApiError> {
        let mut validator = Validator::new();
        validator.check("name", "name is required", not_blank(&self.name));
        validator.check("description", "description is required", not_blank(&self.description));

        if validator.valid() {
            Ok(())
        } else {
            Err(validator.into_error())
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateMemberBody {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub role: Option<String>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("invalid id"))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(body): ValidatedJson<ProjectBody>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;

    let project = state
        .projects
        .create(CreateProjectRequest {
            name: body.name,
            description: body.description,
            user_id: user.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let role = match query.role.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            ProjectMemberRole::parse(raw).ok_or_else(|| ApiError::bad_request("invalid role"))?,
        ),
    };

    let projects = state.projects.list_by_user_id(user.user_id, role).await?;
    Ok(Json(projects))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let project = state.projects.get_by_id(id, user.user_id).await?;
    Ok(Json(project))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<ProjectBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    body.validate()?;

    let project = state
        .projects
        .update(UpdateProjectRequest {
            id,
            name: body.name,
            description: body.description,
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(project))
}

pub async fn create_member(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<CreateMemberBody>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;

    let mut validator = Validator::new();
    validator.check("email", "email is required", not_blank(&body.email));
    validator.check("email", "email is invalid", valid_email(&body.email));
    if !validator.valid() {
        return Err(validator.into_error());
    }

    let member = state
        .projects
        .create_member(CreateMemberRequest {
            project_id: id,
            email: body.email,
            request_user_id: user.user_id,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(member)))
}
