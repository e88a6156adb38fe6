// Login and refresh-token rotation endpoints.
//
// The refresh credential travels only in an HttpOnly cookie. A failed
// refresh clears the cookie so clients do not retry a burned token.

use axum::{
    extract::State,
    http::{
        header::{COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use teamline_common::types::User;

use super::AppState;
use crate::error::ApiError;
use crate::service::{LoginRequest, LoginResult};
use crate::validation::{not_blank, valid_email, ValidatedJson, Validator};

pub const REFRESH_TOKEN_COOKIE: &str = "project_chat_refresh_token";

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
    user: User,
}

impl LoginBody {
    fn validate(&self) -> Result<(), ApiError> {
        let mut validator = Validator::new();
        validator.check("email", "email is required", not_blank(&self.email));
        validator.check("email", "email is invalid", valid_email(&self.email));
        validator.check("password", "password is required", not_blank(&self.password));

        if validator.valid() {
            Ok(())
        } else {
            Err(validator.into_error())
        }
    }
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<LoginBody>,
) -> Result<Response, ApiError> {
    body.validate()?;

    let result = state
        .users
        .login(LoginRequest { email: body.email, password: body.password })
        .await?;

    Ok(login_response(result))
}

pub async fn refresh_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(presented) = refresh_cookie_from(&headers) else {
        let mut response = ApiError::unauthorized("refresh token not found").into_response();
        set_refresh_cookie(&mut response, "");
        return response;
    };

    match state.users.refresh_token(&presented).await {
        Ok(result) => login_response(result),
        Err(refresh_error) => {
            let mut response = refresh_error.into_response();
            set_refresh_cookie(&mut response, "");
            response
        }
    }
}

fn login_response(result: LoginResult) -> Response {
    let mut response = (
        StatusCode::OK,
        Json(LoginResponse { access_token: result.access_token, user: result.user }),
    )
        .into_response();
    set_refresh_cookie(&mut response, &result.refresh_token);
    response
}

fn set_refresh_cookie(response: &mut Response, value: &str) {
    let cookie = format!("{REFRESH_TOKEN_COOKIE}={value}; Path=/; HttpOnly; SameSite=Lax");
    if let Ok(header) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(SET_COOKIE, header);
    }
}

fn refresh_cookie_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == REFRESH_TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
}
