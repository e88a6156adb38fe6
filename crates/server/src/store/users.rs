use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use teamline_common::types::{RefreshToken, User};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::map_db_error;
use crate::error::ApiError;

#[derive(Clone)]
pub enum UserStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryUserStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: HashMap<Uuid, User>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            email: self.email,
            password: self.password,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RefreshTokenRow {
    id: Uuid,
    user_id: Uuid,
    token: String,
    active: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl RefreshTokenRow {
    fn into_refresh_token(self) -> RefreshToken {
        RefreshToken {
            id: self.id,
            user_id: self.user_id,
            token: self.token,
            active: self.active,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

impl UserStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryUserStore::default())))
    }

    pub async fn create(&self, user: &User) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO users (id, name, email, password, created_at) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(user.id)
                .bind(&user.name)
                .bind(&user.email)
                .bind(&user.password)
                .bind(user.created_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert user", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if guard.users.values().any(|existing| existing.email == user.email) {
                    return Err(ApiError::duplicate_entry("duplicate entry"));
                }
                guard.users.insert(user.id, user.clone());
                Ok(())
            }
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<User, ApiError> {
        match self {
            Self::Postgres(pool) => sqlx::query_as::<_, UserRow>(
                "SELECT id, name, email, password, created_at FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|error| map_db_error("failed to fetch user", error))?
            .map(UserRow::into_user)
            .ok_or_else(|| ApiError::not_found("not found")),
            Self::Memory(store) => store
                .read()
                .await
                .users
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, ApiError> {
        match self {
            Self::Postgres(pool) => sqlx::query_as::<_, UserRow>(
                "SELECT id, name, email, password, created_at FROM users WHERE email = $1",
            )
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(|error| map_db_error("failed to fetch user by email", error))?
            .map(UserRow::into_user)
            .ok_or_else(|| ApiError::not_found("not found")),
            Self::Memory(store) => store
                .read()
                .await
                .users
                .values()
                .find(|user| user.email == email)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    pub async fn create_refresh_token(&self, token: &RefreshToken) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO refresh_tokens (id, user_id, token, active, created_at, expires_at) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(token.id)
                .bind(token.user_id)
                .bind(&token.token)
                .bind(token.active)
                .bind(token.created_at)
                .bind(token.expires_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert refresh token", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if guard.refresh_tokens.contains_key(&token.token) {
                    return Err(ApiError::duplicate_entry("duplicate entry"));
                }
                guard.refresh_tokens.insert(token.token.clone(), token.clone());
                Ok(())
            }
        }
    }

    pub async fn get_refresh_token(&self, token: &str) -> Result<RefreshToken, ApiError> {
        match self {
            Self::Postgres(pool) => sqlx::query_as::<_, RefreshTokenRow>(
                "SELECT id, user_id, token, active, created_at, expires_at \
                 FROM refresh_tokens WHERE token = $1",
            )
            .bind(token)
            .fetch_optional(pool)
            .await
            .map_err(|error| map_db_error("failed to fetch refresh token", error))?
            .map(RefreshTokenRow::into_refresh_token)
            .ok_or_else(|| ApiError::not_found("not found")),
            Self::Memory(store) => store
                .read()
                .await
                .refresh_tokens
                .get(token)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    pub async fn set_refresh_token_active(&self, id: Uuid, active: bool) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("UPDATE refresh_tokens SET active = $2 WHERE id = $1")
                    .bind(id)
                    .bind(active)
                    .execute(pool)
                    .await
                    .map_err(|error| map_db_error("failed to update refresh token", error))?;

                if result.rows_affected() == 0 {
                    return Err(ApiError::not_found("not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let token = guard
                    .refresh_tokens
                    .values_mut()
                    .find(|token| token.id == id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                token.active = active;
                Ok(())
            }
        }
    }
}
