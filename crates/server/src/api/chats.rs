use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;
use crate::service::{
    CreateChatMessageRequest, ListMessagesRequest, DEFAULT_MESSAGE_PAGE_SIZE,
};
use crate::validation::{not_blank, ValidatedJson, Validator};

#[derive(Debug, Deserialize)]
pub struct CreateMessageBody {
    #[serde(default)]
    pub chat_id: Option<Uuid>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub before: Option<String>,
    pub limit: Option<String>,
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::bad_request("invalid id"))
}

pub async fn get_by_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = parse_id(&project_id)?;
    let chat = state.chats.get_by_project_id(project_id, user.user_id).await?;
    Ok(Json(chat))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(project_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = parse_id(&project_id)?;

    let before: Option<DateTime<Utc>> = match query.before.as_deref().filter(|raw| !raw.is_empty())
    {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|_| ApiError::bad_request("invalid before"))?,
        ),
        None => None,
    };

    let limit = match query.limit.as_deref().filter(|raw| !raw.is_empty()) {
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|limit| *limit > 0)
            .ok_or_else(|| ApiError::bad_request("invalid limit"))?,
        None => DEFAULT_MESSAGE_PAGE_SIZE,
    };

    let page = state
        .chats
        .list_messages_by_project_id(ListMessagesRequest {
            project_id,
            user_id: user.user_id,
            before,
            limit,
        })
        .await?;

    Ok(Json(page))
}

pub async fn create_message(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    ValidatedJson(body): ValidatedJson<CreateMessageBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut validator = Validator::new();
    validator.check("chat_id", "chat_id is invalid", body.chat_id.is_some());
    validator.check("content", "content is required", not_blank(&body.content));
    let Some(chat_id) = body.chat_id else {
        return Err(validator.into_error());
    };
    if !validator.valid() {
        return Err(validator.into_error());
    }

    let message = state
        .chats
        .create_message(CreateChatMessageRequest {
            chat_id,
            user_id: user.user_id,
            content: body.content,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}
