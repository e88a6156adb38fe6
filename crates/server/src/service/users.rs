// Account and credential service: signup, login, and single-use
// refresh-token rotation with reuse detection.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::RngCore;
use teamline_common::types::{RefreshToken, User};
use tracing::warn;
use uuid::Uuid;

use crate::auth::jwt::TokenService;
use crate::error::{ApiError, ErrorKind};
use crate::store::UserStore;

const ACCESS_TOKEN_TTL_MINUTES: i64 = 30;
const REFRESH_TOKEN_TTL_HOURS: i64 = 3;
const REFRESH_TOKEN_BYTES: usize = 48;
const BCRYPT_COST: u32 = 10;

const INVALID_CREDENTIALS: &str = "invalid credentials";
const INVALID_REFRESH_TOKEN: &str = "invalid refresh token";

#[derive(Clone)]
pub struct UserService {
    tokens: Arc<TokenService>,
    users: UserStore,
}

#[derive(Debug, Clone)]
pub struct CreateUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResult {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

impl UserService {
    pub fn new(tokens: Arc<TokenService>, users: UserStore) -> Self {
        Self { tokens, users }
    }

    pub async fn create(&self, request: CreateUserRequest) -> Result<User, ApiError> {
        let hashed = hash_password(request.password).await?;

        let user = User {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
            password: hashed,
            created_at: Utc::now(),
        };

        self.users.create(&user).await.map_err(|error| match error.kind() {
            ErrorKind::DuplicateEntry => ApiError::duplicate_entry("user email is already taken"),
            _ => error,
        })?;

        Ok(user)
    }

    /// Unknown email and wrong password return the same error to avoid
    /// user enumeration.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResult, ApiError> {
        let user = self
            .users
            .get_by_email(&request.email)
            .await
            .map_err(|_| ApiError::unauthorized(INVALID_CREDENTIALS))?;

        if !compare_hash(request.password, user.password.clone()).await {
            return Err(ApiError::unauthorized(INVALID_CREDENTIALS));
        }

        let access_token = self.access_token_for(&user)?;
        let refresh_token = self.issue_refresh_token(user.id).await?;

        Ok(LoginResult { access_token, refresh_token: refresh_token.token, user })
    }

    pub async fn get_me(&self, id: Uuid) -> Result<User, ApiError> {
        self.users.get_by_id(id).await
    }

    /// Single-use rotation: a successful refresh deactivates the
    /// presented token and issues exactly one replacement.
    pub async fn refresh_token(&self, presented: &str) -> Result<LoginResult, ApiError> {
        let refresh = self.users.get_refresh_token(presented).await.map_err(|error| {
            match error.kind() {
                ErrorKind::NotFound => ApiError::unauthorized(INVALID_REFRESH_TOKEN),
                _ => error,
            }
        })?;

        // An inactive token that still exists means the single-use
        // credential was presented twice: reuse.
        if !refresh.active {
            return Err(ApiError::unauthorized(INVALID_REFRESH_TOKEN));
        }

        if refresh.expires_at <= Utc::now() {
            return Err(ApiError::unauthorized(INVALID_REFRESH_TOKEN));
        }

        let user = self
            .users
            .get_by_id(refresh.user_id)
            .await
            .map_err(|_| ApiError::unauthorized(INVALID_REFRESH_TOKEN))?;

        let access_token = self.access_token_for(&user)?;
        let new_refresh = self.issue_refresh_token(user.id).await?;

        // The new tokens are already issued; a failed deactivation is
        // logged and the rotation still succeeds.
        if let Err(error) = self.users.set_refresh_token_active(refresh.id, false).await {
            warn!(token_id = %refresh.id, error = %error, "failed to deactivate rotated refresh token");
        }

        Ok(LoginResult { access_token, refresh_token: new_refresh.token, user })
    }

    fn access_token_for(&self, user: &User) -> Result<String, ApiError> {
        self.tokens
            .generate(
                &user.id.to_string(),
                Utc::now() + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES),
                HashMap::new(),
            )
            .map_err(|error| ApiError::server("error while generating token", error))
    }

    async fn issue_refresh_token(&self, user_id: Uuid) -> Result<RefreshToken, ApiError> {
        let refresh = RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token: generate_refresh_token(REFRESH_TOKEN_BYTES),
            active: true,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(REFRESH_TOKEN_TTL_HOURS),
        };

        self.users.create_refresh_token(&refresh).await?;

        Ok(refresh)
    }
}

/// `length` random bytes, URL-safe base64 without padding.
pub fn generate_refresh_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// bcrypt runs off the async runtime; hashing is deliberately slow.
pub async fn hash_password(plaintext: String) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, BCRYPT_COST))
        .await
        .map_err(|error| ApiError::server("password hashing task failed", error))?
        .map_err(|error| ApiError::server("failed to hash password", error))
}

pub async fn compare_hash(plaintext: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash))
        .await
        .ok()
        .and_then(Result::ok)
        .unwrap_or(false)
}
