// Chat side-effect pipeline.
//
// Reacts to project and chat events to keep each project's chat in
// step: bootstrap the chat on project creation, cascade new project
// members into chat members, synthesize join announcements, track
// viewed-at, and fan completed messages out to the room.

use anyhow::anyhow;
use serde::de::DeserializeOwned;
use teamline_common::events::Topic;
use teamline_common::types::{ChatMember, ChatMessage, Project, ProjectMember};
use tracing::{error, info, warn};

use crate::bus::{ConsumedRecord, HandlerError, HandlerResult, Subscriber};
use crate::error::ErrorKind;
use crate::service::ChatService;
use crate::ws::Hub;

pub const CHAT_SUBSCRIBER_GROUP: &str = "chat.subscriber";

const TOPICS: [Topic; 5] = [
    Topic::ProjectCreated,
    Topic::ProjectMemberCreated,
    Topic::ChatMemberCreated,
    Topic::ChatMemberViewed,
    Topic::ChatMessageCreated,
];

#[derive(Clone)]
pub struct ChatPipeline {
    chats: ChatService,
    hub: Hub,
}

impl ChatPipeline {
    pub fn new(chats: ChatService, hub: Hub) -> Self {
        Self { chats, hub }
    }

    pub fn run(&self, subscriber: &Subscriber) {
        let pipeline = self.clone();
        subscriber.subscribe(&TOPICS, move |record| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(record).await }
        });
    }

    pub async fn handle(&self, record: ConsumedRecord) -> HandlerResult {
        match record.topic {
            Topic::ProjectCreated => self.on_project_created(&record.payload).await,
            Topic::ProjectMemberCreated => self.on_project_member_created(&record.payload).await,
            Topic::ChatMemberCreated => self.on_chat_member_created(&record.payload).await,
            Topic::ChatMemberViewed => self.on_chat_member_viewed(&record.payload).await,
            Topic::ChatMessageCreated => self.on_chat_message_created(&record.payload).await,
            other => {
                warn!(topic = %other, "chat pipeline received an unexpected topic");
                Ok(())
            }
        }
    }

    /// Best-effort chat bootstrap: the project exists independently, so
    /// a failed chat creation is logged and the record is not retried.
    async fn on_project_created(&self, payload: &[u8]) -> HandlerResult {
        let project: Project = decode(payload, "project")?;

        if let Err(create_error) = self.chats.create_chat_from_project(&project).await {
            error!(project_id = %project.id, error = %create_error, "failed to create chat from project");
        }

        Ok(())
    }

    /// The chat may not exist yet when the member record arrives before
    /// `project.created` has been processed; that case is skipped.
    async fn on_project_member_created(&self, payload: &[u8]) -> HandlerResult {
        let member: ProjectMember = decode(payload, "project member")?;

        match self.chats.create_member_from_project_member(&member).await {
            Ok(()) => Ok(()),
            Err(cascade_error) => match cascade_error.kind() {
                ErrorKind::NotFound => {
                    info!(
                        project_id = %member.project_id,
                        user_id = %member.user_id,
                        "chat not found, skipping chat member cascade"
                    );
                    Ok(())
                }
                // Already cascaded on a previous delivery.
                ErrorKind::DuplicateEntry => Ok(()),
                _ => Err(HandlerError::transient(anyhow!("{cascade_error}"))),
            },
        }
    }

    async fn on_chat_member_created(&self, payload: &[u8]) -> HandlerResult {
        let member: ChatMember = decode(payload, "chat member")?;

        self.chats
            .create_joined_message(&member)
            .await
            .map_err(|join_error| HandlerError::transient(anyhow!("{join_error}")))
    }

    async fn on_chat_member_viewed(&self, payload: &[u8]) -> HandlerResult {
        let member: ChatMember = decode(payload, "chat member")?;

        match self.chats.update_member_last_seen(&member).await {
            Ok(()) => Ok(()),
            Err(view_error) => match view_error.kind() {
                ErrorKind::NotFound => Err(HandlerError::terminal(anyhow!("{view_error}"))),
                _ => Err(HandlerError::transient(anyhow!("{view_error}"))),
            },
        }
    }

    async fn on_chat_message_created(&self, payload: &[u8]) -> HandlerResult {
        let message: ChatMessage = decode(payload, "chat message")?;
        self.hub.send_chat_message(&message);
        Ok(())
    }
}

pub(super) fn decode<T: DeserializeOwned>(payload: &[u8], entity: &str) -> Result<T, HandlerError> {
    serde_json::from_slice(payload)
        .map_err(|decode_error| HandlerError::terminal(anyhow!("failed to decode {entity}: {decode_error}")))
}
