// WebSocket frame types for the Teamline real-time protocol.
//
// Every frame on the wire is a JSON object tagged by `type`. Inbound
// frames are `ping`, `pong`, `connect_user_to_room`, and
// `disconnect_user_from_room`; everything else is outbound only.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ChatMessage, Task};

/// All frame types in the Teamline WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Bidirectional liveness probe.
    Ping,

    /// Bidirectional liveness reply.
    Pong,

    /// Server -> Client: handshake or room-join failure.
    Error { data: ErrorData },

    /// Server -> Client: a chat message, routed by chat id.
    Message { room_id: Uuid, data: ChatMessage },

    /// Server -> Client: a new task, routed by project id.
    TaskCreated { room_id: Uuid, data: Task },

    /// Server -> Client: an updated task, routed by project id.
    TaskUpdated { room_id: Uuid, data: Task },

    /// Server -> Client: a member joined the room.
    UserConnected { room_id: Uuid, data: RoomPresence },

    /// Server -> Client: a member left the room.
    UserDisconnected { room_id: Uuid, data: RoomPresence },

    /// Server -> Client: periodic list of connected members.
    UsersOnline { room_id: Uuid, data: Vec<Uuid> },

    /// Client -> Server: join a room after a permission check.
    ConnectUserToRoom { data: JoinRoomData },

    /// Client -> Server: leave a room.
    DisconnectUserFromRoom { data: LeaveRoomData },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorData {
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Chat,
    Project,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRoomData {
    pub room_id: Uuid,
    #[serde(rename = "type")]
    pub kind: RoomKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaveRoomData {
    pub room_id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomPresence {
    pub user_id: Uuid,
    pub room_id: Uuid,
}

impl Frame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { data: ErrorData { message: message.into() } }
    }

    /// A chat message frame, routed to the chat room.
    pub fn chat_message(message: &ChatMessage) -> Self {
        Self::Message { room_id: message.chat_id, data: message.clone() }
    }

    /// A task-created frame, routed to the project room.
    pub fn task_created(task: &Task) -> Self {
        Self::TaskCreated { room_id: task.project_id, data: task.clone() }
    }

    /// A task-updated frame, routed to the project room.
    pub fn task_updated(task: &Task) -> Self {
        Self::TaskUpdated { room_id: task.project_id, data: task.clone() }
    }

    pub fn user_connected(user_id: Uuid, room_id: Uuid) -> Self {
        Self::UserConnected { room_id, data: RoomPresence { user_id, room_id } }
    }

    pub fn user_disconnected(user_id: Uuid, room_id: Uuid) -> Self {
        Self::UserDisconnected { room_id, data: RoomPresence { user_id, room_id } }
    }

    pub fn users_online(room_id: Uuid, user_ids: Vec<Uuid>) -> Self {
        Self::UsersOnline { room_id, data: user_ids }
    }
}

pub fn decode_frame(raw: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str::<Frame>(raw)
}

pub fn encode_frame(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}
