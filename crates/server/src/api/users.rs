use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::auth::middleware::AuthenticatedUser;
use crate::error::ApiError;
use crate::service::CreateUserRequest;
use crate::validation::{min_length, not_blank, valid_email, ValidatedJson, Validator};

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl CreateUserBody {
    fn validate(&self) -> Result<(), ApiError> {
        let mut validator = Validator::new();
        validator.check("name", "name is required", not_blank(&self.name));
        validator.check("email", "email is required", not_blank(&self.email));
        validator.check("email", "email is invalid", valid_email(&self.email));
        validator.check("password", "password is required", not_blank(&self.password));
        validator.check(
            "password",
            "password must be at least 6 characters",
            min_length(&self.password, 6),
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
    ValidatedJson(body): ValidatedJson<CreateUserBody>,
) -> Result<impl IntoResponse, ApiError> {
    body.validate()?;

    let user = state
        .users
        .create(CreateUserRequest {
            name: body.name,
            email: body.email,
            password: body.password,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.users.get_me(user.user_id).await?;
    Ok(Json(user))
}
