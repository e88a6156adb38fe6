// Event catalog: the closed set of topics carried by the partitioned log.
//
// Each topic's record value is the JSON snapshot of the corresponding
// domain entity. Publishing is only possible through this enum, so
// unknown topics are unrepresentable at publish time; consumers ignore
// (with a warning) record topics that no longer parse.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Payload: [`crate::types::Project`]
    ProjectCreated,
    /// Payload: [`crate::types::Project`]
    ProjectUpdated,
    /// Payload: [`crate::types::ProjectMember`]
    ProjectMemberCreated,
    /// Payload: [`crate::types::ProjectMember`]
    ProjectMemberRemoved,
    /// Payload: [`crate::types::ChatMember`]
    ChatMemberCreated,
    /// Payload: [`crate::types::ChatMember`]
    ChatMemberViewed,
    /// Payload: [`crate::types::ChatMessage`]
    ChatMessageCreated,
    /// Payload: [`crate::types::Task`]
    TaskCreated,
    /// Payload: [`crate::types::Task`]
    TaskUpdated,
}

impl Topic {
    pub const ALL: [Topic; 9] = [
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectMemberCreated,
        Self::ProjectMemberRemoved,
        Self::ChatMemberCreated,
        Self::ChatMemberViewed,
        Self::ChatMessageCreated,
        Self::TaskCreated,
        Self::TaskUpdated,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProjectCreated => "project.created",
            Self::ProjectUpdated => "project.updated",
            Self::ProjectMemberCreated => "project.member.created",
            Self::ProjectMemberRemoved => "project.member.removed",
            Self::ChatMemberCreated => "chat.member.created",
            Self::ChatMemberViewed => "chat.member.viewed",
            Self::ChatMessageCreated => "chat.message.created",
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|topic| topic.as_str() == value)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
