use chrono::{DateTime, Utc};
use serde::Serialize;
use teamline_common::events::Topic;
use teamline_common::types::{
    Chat, ChatMember, ChatMessage, MessageType, Project, ProjectMember,
};
use uuid::Uuid;

use crate::bus::Publisher;
use crate::error::{ApiError, ErrorKind};
use crate::store::{ChatStore, UserStore};

pub const DEFAULT_MESSAGE_PAGE_SIZE: i64 = 20;
pub const MAX_MESSAGE_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct ChatService {
    chats: ChatStore,
    users: UserStore,
    publisher: Publisher,
}

#[derive(Debug, Clone)]
pub struct CreateChatMessageRequest {
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ListMessagesRequest {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
}

/// Cursor-paginated slice; `has_next` is a hint that an older page may
/// exist.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub data: Vec<T>,
    pub has_next: bool,
}

fn is_member(chat: &Chat, user_id: Uuid) -> bool {
    chat.members.iter().any(|member| member.user_id == user_id)
}

impl ChatService {
    pub fn new(chats: ChatStore, users: UserStore, publisher: Publisher) -> Self {
        Self { chats, users, publisher }
    }

    /// Bootstrap reaction to `project.created`: a chat bound to the
    /// project id with one chat-member per initial project member.
    pub async fn create_chat_from_project(&self, project: &Project) -> Result<(), ApiError> {
        let now = Utc::now();
        let chat_id = Uuid::new_v4();

        let members = project
            .members
            .iter()
            .map(|member: &ProjectMember| ChatMember {
                chat_id,
                user_id: member.user_id,
                last_seen_at: now,
                joined_at: now,
                user: None,
            })
            .collect();

        let chat = Chat {
            id: chat_id,
            project_id: project.id,
            created_at: now,
            updated_at: now,
            members,
            messages: Vec::new(),
        };

        self.chats.create(&chat).await
    }

    /// Cascade reaction to `project.member.created`. Returns NotFound
    /// when the chat does not exist yet; the caller decides whether to
    /// skip.
    pub async fn create_member_from_project_member(
        &self,
        project_member: &ProjectMember,
    ) -> Result<(), ApiError> {
        let chat = self.chats.get_by_project_id(project_member.project_id).await?;

        let now = Utc::now();
        let member = ChatMember {
            chat_id: chat.id,
            user_id: project_member.user_id,
            last_seen_at: now,
            joined_at: now,
            user: None,
        };

        self.chats.create_member(&member).await?;

        self.publisher
            .publish(Topic::ChatMemberCreated, member.chat_id, &member)
            .await?;

        Ok(())
    }

    /// Reaction to `chat.member.created`: persist the system message
    /// announcing the join and publish it for broadcast.
    pub async fn create_joined_message(&self, chat_member: &ChatMember) -> Result<(), ApiError> {
        let user = self.users.get_by_id(chat_member.user_id).await?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id: chat_member.chat_id,
            user_id: None,
            message_type: MessageType::System,
            content: format!("{} has joined the chat", user.name),
            created_at: chat_member.joined_at,
            updated_at: chat_member.joined_at,
            member: None,
        };

        self.chats.create_message(&message).await?;

        self.publisher
            .publish(Topic::ChatMessageCreated, message.chat_id, &message)
            .await?;

        Ok(())
    }

    /// Member-only message creation; publishes `chat.message.created`
    /// which the chat pipeline fans out to the room.
    pub async fn create_message(
        &self,
        request: CreateChatMessageRequest,
    ) -> Result<ChatMessage, ApiError> {
        let chat = self.chats.get_by_id(request.chat_id).await.map_err(|error| {
            match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("chat not found"),
                _ => error,
            }
        })?;

        let member = chat
            .members
            .iter()
            .find(|member| member.user_id == request.user_id)
            .cloned()
            .ok_or_else(|| ApiError::forbidden("forbidden"))?;

        let now = Utc::now();
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_id: request.chat_id,
            user_id: Some(request.user_id),
            message_type: MessageType::Text,
            content: request.content,
            created_at: now,
            updated_at: now,
            member: Some(member),
        };

        self.chats.create_message(&message).await?;

        self.publisher
            .publish(Topic::ChatMessageCreated, message.chat_id, &message)
            .await?;

        Ok(message)
    }

    /// Member-only chat fetch by chat id; the hub's permission check
    /// for chat rooms.
    pub async fn get_by_id(&self, id: Uuid, user_id: Uuid) -> Result<Chat, ApiError> {
        let chat = self.chats.get_by_id(id).await.map_err(|error| match error.kind() {
            ErrorKind::NotFound => ApiError::not_found("chat not found"),
            _ => error,
        })?;

        if !is_member(&chat, user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        Ok(chat)
    }

    pub async fn get_by_project_id(&self, project_id: Uuid, user_id: Uuid) -> Result<Chat, ApiError> {
        let chat = self
            .chats
            .get_by_project_id(project_id)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => ApiError::not_found("chat not found"),
                _ => error,
            })?;

        if !is_member(&chat, user_id) {
            return Err(ApiError::forbidden("forbidden"));
        }

        Ok(chat)
    }

    /// Marks the member as having viewed the chat; driven by the
    /// fire-and-forget `chat.member.viewed` publish on room join.
    pub async fn update_member_last_seen(
        &self,
        chat_member: &ChatMember,
    ) -> Result<(), ApiError> {
        self.chats
            .update_member_last_seen(chat_member.chat_id, chat_member.user_id, chat_member.last_seen_at)
            .await
    }

    /// Newest-first page of messages, returned oldest-first within the
    /// page for rendering.
    pub async fn list_messages_by_project_id(
        &self,
        request: ListMessagesRequest,
    ) -> Result<CursorPage<ChatMessage>, ApiError> {
        let chat = self.get_by_project_id(request.project_id, request.user_id).await?;

        let limit = request.limit.clamp(1, MAX_MESSAGE_PAGE_SIZE);
        let mut messages = self.chats.list_messages(chat.id, request.before, limit).await?;
        messages.reverse();

        let has_next = messages.len() as i64 >= limit;
        Ok(CursorPage { data: messages, has_next })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use teamline_common::events::Topic;
    use teamline_common::types::{
        ChatMember, MessageType, Project, ProjectMember, ProjectMemberRole, User,
    };
    use uuid::Uuid;

    use super::{ChatService, CreateChatMessageRequest};
    use crate::bus::{EventLog, Publisher};
    use crate::error::ErrorKind;
    use crate::store::{ChatStore, UserStore};

    struct Fixture {
        chats: ChatService,
        store: ChatStore,
        log: Arc<EventLog>,
        owner: User,
        member: User,
    }

    async fn fixture() -> Fixture {
        let log = EventLog::new(1);
        let publisher = Publisher::new(log.clone());
        let users = UserStore::memory();
        let store = ChatStore::memory();

        let owner = User {
            id: Uuid::new_v4(),
            name: "Owner".to_string(),
            email: "owner@b.c".to_string(),
            password: "hash".to_string(),
            created_at: Utc::now(),
        };
        let member = User {
            id: Uuid::new_v4(),
            name: "Member".to_string(),
            email: "member@b.c".to_string(),
            password: "hash".to_string(),
            created_at: Utc::now(),
        };
        users.create(&owner).await.expect("owner should insert");
        users.create(&member).await.expect("member should insert");

        let chats = ChatService::new(store.clone(), users, publisher);
        Fixture { chats, store, log, owner, member }
    }

    fn project_with(owner: &User) -> Project {
        let project_id = Uuid::new_v4();
        Project {
            id: project_id,
            user_id: owner.id,
            name: "alpha".to_string(),
            description: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            members: vec![ProjectMember {
                id: Uuid::new_v4(),
                user_id: owner.id,
                project_id,
                role: ProjectMemberRole::Creator,
                user: None,
            }],
        }
    }

    #[tokio::test]
    async fn chat_bootstrap_copies_project_members() {
        let fixture = fixture().await;
        let project = project_with(&fixture.owner);

        fixture
            .chats
            .create_chat_from_project(&project)
            .await
            .expect("chat should be created");

        let chat = fixture
            .store
            .get_by_project_id(project.id)
            .await
            .expect("chat should exist");
        assert_eq!(chat.members.len(), 1);
        assert_eq!(chat.members[0].user_id, fixture.owner.id);
    }

    #[tokio::test]
    async fn member_cascade_requires_existing_chat() {
        let fixture = fixture().await;

        let orphan = ProjectMember {
            id: Uuid::new_v4(),
            user_id: fixture.member.id,
            project_id: Uuid::new_v4(),
            role: ProjectMemberRole::Member,
            user: None,
        };

        let error = fixture
            .chats
            .create_member_from_project_member(&orphan)
            .await
            .expect_err("missing chat should surface NotFound");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn member_cascade_publishes_chat_member_created() {
        let fixture = fixture().await;
        let project = project_with(&fixture.owner);
        fixture
            .chats
            .create_chat_from_project(&project)
            .await
            .expect("chat should be created");

        let project_member = ProjectMember {
            id: Uuid::new_v4(),
            user_id: fixture.member.id,
            project_id: project.id,
            role: ProjectMemberRole::Member,
            user: None,
        };
        fixture
            .chats
            .create_member_from_project_member(&project_member)
            .await
            .expect("cascade should succeed");

        let batch = fixture.log.next_batch(Topic::ChatMemberCreated, 0, 0).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn joined_message_is_a_system_message() {
        let fixture = fixture().await;
        let project = project_with(&fixture.owner);
        fixture
            .chats
            .create_chat_from_project(&project)
            .await
            .expect("chat should be created");
        let chat = fixture
            .store
            .get_by_project_id(project.id)
            .await
            .expect("chat should exist");

        let chat_member = ChatMember {
            chat_id: chat.id,
            user_id: fixture.owner.id,
            last_seen_at: Utc::now(),
            joined_at: Utc::now(),
            user: None,
        };
        fixture
            .chats
            .create_joined_message(&chat_member)
            .await
            .expect("joined message should be created");

        let messages = fixture
            .store
            .list_messages(chat.id, None, 10)
            .await
            .expect("messages should list");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type, MessageType::System);
        assert_eq!(messages[0].user_id, None);
        assert_eq!(messages[0].content, "Owner has joined the chat");

        let batch = fixture.log.next_batch(Topic::ChatMessageCreated, 0, 0).await;
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn non_member_cannot_post_messages() {
        let fixture = fixture().await;
        let project = project_with(&fixture.owner);
        fixture
            .chats
            .create_chat_from_project(&project)
            .await
            .expect("chat should be created");
        let chat = fixture
            .store
            .get_by_project_id(project.id)
            .await
            .expect("chat should exist");

        let error = fixture
            .chats
            .create_message(CreateChatMessageRequest {
                chat_id: chat.id,
                user_id: fixture.member.id,
                content: "hi".to_string(),
            })
            .await
            .expect_err("non-member should be rejected");
        assert_eq!(error.kind(), ErrorKind::Forbidden);
    }
}
