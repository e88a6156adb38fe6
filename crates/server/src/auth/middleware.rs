// Bearer-token middleware.
//
// `identify_user` resolves the caller from the Authorization header
// when one is present; requests without a header pass through
// anonymously. `require_auth` gates routes that need a caller.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::jwt::TokenService;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

pub async fn identify_user(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    const INVALID_TOKEN: &str = "invalid token";

    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return next.run(request).await;
    };

    let Some(token) = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
    else {
        return ApiError::unauthorized(INVALID_TOKEN).into_response();
    };

    let claims = match tokens.verify(token) {
        Ok(claims) => claims,
        Err(_) => return ApiError::unauthorized(INVALID_TOKEN).into_response(),
    };

    if claims.is_expired_at(Utc::now()) {
        return ApiError::unauthorized(INVALID_TOKEN).into_response();
    }

    let user_id = match claims.subject() {
        Ok(user_id) => user_id,
        Err(_) => return ApiError::unauthorized(INVALID_TOKEN).into_response(),
    };

    request.extensions_mut().insert(AuthenticatedUser { user_id });

    next.run(request).await
}

pub async fn require_auth(request: Request, next: Next) -> Response {
    if request.extensions().get::<AuthenticatedUser>().is_none() {
        return ApiError::unauthorized("unauthorized").into_response();
    }

    next.run(request).await
}
