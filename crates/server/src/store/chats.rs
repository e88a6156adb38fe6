use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use teamline_common::types::{Chat, ChatMember, ChatMessage, MessageType};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::map_db_error;
use crate::error::ApiError;

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryChatStore>>),
}

#[derive(Debug, Default)]
pub struct MemoryChatStore {
    chats: HashMap<Uuid, Chat>,
    messages: HashMap<Uuid, Vec<ChatMessage>>,
    by_project: HashMap<Uuid, Uuid>,
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    project_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChatRow {
    fn into_chat(self, members: Vec<ChatMember>) -> Chat {
        Chat {
            id: self.id,
            project_id: self.project_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            members,
            messages: Vec::new(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChatMemberRow {
    chat_id: Uuid,
    user_id: Uuid,
    last_seen_at: DateTime<Utc>,
    joined_at: DateTime<Utc>,
}

impl ChatMemberRow {
    fn into_member(self) -> ChatMember {
        ChatMember {
            chat_id: self.chat_id,
            user_id: self.user_id,
            last_seen_at: self.last_seen_at,
            joined_at: self.joined_at,
            user: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ChatMessageRow {
    id: Uuid,
    chat_id: Uuid,
    user_id: Option<Uuid>,
    message_type: String,
    content: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChatMessageRow {
    fn into_message(self) -> Result<ChatMessage, ApiError> {
        let message_type = match self.message_type.as_str() {
            "text" => MessageType::Text,
            "system" => MessageType::System,
            other => {
                return Err(ApiError::server(
                    "invalid message type in database",
                    anyhow::anyhow!("message_type '{other}'"),
                ))
            }
        };

        Ok(ChatMessage {
            id: self.id,
            chat_id: self.chat_id,
            user_id: self.user_id,
            message_type,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            member: None,
        })
    }
}

fn message_type_str(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Text => "text",
        MessageType::System => "system",
    }
}

impl ChatStore {
    pub fn postgres(pool: PgPool) -> Self {
        Self::Postgres(pool)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryChatStore::default())))
    }

    /// Inserts the chat and its initial members in one transaction.
    pub async fn create(&self, chat: &Chat) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let mut tx = pool
                    .begin()
                    .await
                    .map_err(|error| map_db_error("failed to begin transaction", error))?;

                sqlx::query(
                    "INSERT INTO chats (id, project_id, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(chat.id)
                .bind(chat.project_id)
                .bind(chat.created_at)
                .bind(chat.updated_at)
                .execute(&mut *tx)
                .await
                .map_err(|error| map_db_error("failed to insert chat", error))?;

                for member in &chat.members {
                    sqlx::query(
                        "INSERT INTO chat_members (chat_id, user_id, last_seen_at, joined_at) \
                         VALUES ($1, $2, $3, $4)",
                    )
                    .bind(member.chat_id)
                    .bind(member.user_id)
                    .bind(member.last_seen_at)
                    .bind(member.joined_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|error| map_db_error("failed to insert chat member", error))?;
                }

                tx.commit()
                    .await
                    .map_err(|error| map_db_error("failed to commit chat insert", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if guard.by_project.contains_key(&chat.project_id) {
                    return Err(ApiError::duplicate_entry("duplicate entry"));
                }
                guard.by_project.insert(chat.project_id, chat.id);
                guard.chats.insert(chat.id, chat.clone());
                Ok(())
            }
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Chat, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ChatRow>(
                    "SELECT id, project_id, created_at, updated_at FROM chats WHERE id = $1",
                )
                .bind(id)
                .fetch_optional(pool)
                .await
                .map_err(|error| map_db_error("failed to fetch chat", error))?
                .ok_or_else(|| ApiError::not_found("not found"))?;

                Ok(row.into_chat(self.members_of(pool, id).await?))
            }
            Self::Memory(store) => store
                .read()
                .await
                .chats
                .get(&id)
                .cloned()
                .ok_or_else(|| ApiError::not_found("not found")),
        }
    }

    pub async fn get_by_project_id(&self, project_id: Uuid) -> Result<Chat, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, ChatRow>(
                    "SELECT id, project_id, created_at, updated_at FROM chats \
                     WHERE project_id = $1",
                )
                .bind(project_id)
                .fetch_optional(pool)
                .await
                .map_err(|error| map_db_error("failed to fetch chat by project", error))?
                .ok_or_else(|| ApiError::not_found("not found"))?;

                let chat_id = row.id;
                Ok(row.into_chat(self.members_of(pool, chat_id).await?))
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                guard
                    .by_project
                    .get(&project_id)
                    .and_then(|chat_id| guard.chats.get(chat_id))
                    .cloned()
                    .ok_or_else(|| ApiError::not_found("not found"))
            }
        }
    }

    async fn members_of(&self, pool: &PgPool, chat_id: Uuid) -> Result<Vec<ChatMember>, ApiError> {
        let members = sqlx::query_as::<_, ChatMemberRow>(
            "SELECT chat_id, user_id, last_seen_at, joined_at FROM chat_members \
             WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_all(pool)
        .await
        .map_err(|error| map_db_error("failed to fetch chat members", error))?;

        Ok(members.into_iter().map(ChatMemberRow::into_member).collect())
    }

    pub async fn create_member(&self, member: &ChatMember) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO chat_members (chat_id, user_id, last_seen_at, joined_at) \
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(member.chat_id)
                .bind(member.user_id)
                .bind(member.last_seen_at)
                .bind(member.joined_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert chat member", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let chat = guard
                    .chats
                    .get_mut(&member.chat_id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                if chat.members.iter().any(|existing| existing.user_id == member.user_id) {
                    return Err(ApiError::duplicate_entry("duplicate entry"));
                }
                chat.members.push(member.clone());
                Ok(())
            }
        }
    }

    pub async fn create_message(&self, message: &ChatMessage) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    "INSERT INTO chat_messages \
                     (id, chat_id, user_id, message_type, content, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(message.id)
                .bind(message.chat_id)
                .bind(message.user_id)
                .bind(message_type_str(message.message_type))
                .bind(&message.content)
                .bind(message.created_at)
                .bind(message.updated_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to insert chat message", error))?;

                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if !guard.chats.contains_key(&message.chat_id) {
                    return Err(ApiError::not_found("not found"));
                }
                guard
                    .messages
                    .entry(message.chat_id)
                    .or_default()
                    .push(message.clone());
                Ok(())
            }
        }
    }

    pub async fn update_member_last_seen(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        last_seen_at: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "UPDATE chat_members SET last_seen_at = $3 \
                     WHERE chat_id = $1 AND user_id = $2",
                )
                .bind(chat_id)
                .bind(user_id)
                .bind(last_seen_at)
                .execute(pool)
                .await
                .map_err(|error| map_db_error("failed to update chat member", error))?;

                if result.rows_affected() == 0 {
                    return Err(ApiError::not_found("not found"));
                }
                Ok(())
            }
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let chat = guard
                    .chats
                    .get_mut(&chat_id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                let member = chat
                    .members
                    .iter_mut()
                    .find(|member| member.user_id == user_id)
                    .ok_or_else(|| ApiError::not_found("not found"))?;
                member.last_seen_at = last_seen_at;
                Ok(())
            }
        }
    }

    /// Newest messages first, optionally only those strictly older than
    /// `before`.
    pub async fn list_messages(
        &self,
        chat_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ChatMessageRow>(
                    "SELECT id, chat_id, user_id, message_type, content, created_at, updated_at \
                     FROM chat_messages \
                     WHERE chat_id = $1 AND ($2::timestamptz IS NULL OR created_at < $2) \
                     ORDER BY created_at DESC LIMIT $3",
                )
                .bind(chat_id)
                .bind(before)
                .bind(limit)
                .fetch_all(pool)
                .await
                .map_err(|error| map_db_error("failed to list chat messages", error))?;

                rows.into_iter().map(ChatMessageRow::into_message).collect()
            }
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut messages: Vec<ChatMessage> = guard
                    .messages
                    .get(&chat_id)
                    .map(|messages| {
                        messages
                            .iter()
                            .filter(|message| {
                                before.map(|before| message.created_at < before).unwrap_or(true)
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                messages.truncate(limit.max(0) as usize);
                Ok(messages)
            }
        }
    }
}
