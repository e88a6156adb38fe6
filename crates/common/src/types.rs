// Core domain types shared across all Teamline crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered account. The password hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
}

/// A single-use refresh credential. Rotation deactivates the presented
/// token and issues a fresh one; an inactive token presented again is
/// treated as reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A project groups members, tasks, and exactly one chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    /// Owner (creator) of the project.
    pub user_id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ProjectMember>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectMemberRole {
    Creator,
    Member,
}

impl ProjectMemberRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "creator" => Some(Self::Creator),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: ProjectMemberRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// The chat bound to a project, created as a side effect of
/// `project.created`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: Uuid,
    pub project_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<ChatMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ChatMessage>,
}

/// Membership row keyed by `(chat_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub last_seen_at: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    System,
}

/// A chat message. `user_id` is `None` exactly when the message is a
/// system message synthesized by the chat pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_id: Option<Uuid>,
    pub message_type: MessageType,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<ChatMember>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Doing,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [Self::Pending, Self::Doing, Self::Done, Self::Archived];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub author_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<TaskChange>,
}

/// Audit row describing one change applied to a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskChange {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub change_description: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Builds the audit entries for an update, one per changed field.
    pub fn changes_against(
        &self,
        updated: &Task,
        author: &User,
        now: DateTime<Utc>,
    ) -> Vec<TaskChange> {
        let mut changes = Vec::new();

        if self.title != updated.title {
            changes.push(TaskChange {
                id: Uuid::new_v4(),
                task_id: self.id,
                author_id: author.id,
                change_description: format!(
                    "Title changed from {} to {} by {}",
                    self.title, updated.title, author.name
                ),
                created_at: now,
            });
        }

        if self.description != updated.description {
            changes.push(TaskChange {
                id: Uuid::new_v4(),
                task_id: self.id,
                author_id: author.id,
                change_description: format!(
                    "Description changed from {} to {} by {}",
                    self.description, updated.description, author.name
                ),
                created_at: now,
            });
        }

        if self.status != updated.status {
            changes.push(TaskChange {
                id: Uuid::new_v4(),
                task_id: self.id,
                author_id: author.id,
                change_description: format!(
                    "Status changed from {} to {} by {}",
                    self.status.as_str(),
                    updated.status.as_str(),
                    author.name
                ),
                created_at: now,
            });
        }

        changes
    }
}
