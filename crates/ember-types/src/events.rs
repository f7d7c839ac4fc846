use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::UserSummary;

/// Commands sent FROM client TO server over the herf relay socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RelayCommand {
    JoinSession { session_id: Uuid },
    LeaveSession { session_id: Uuid },
    ChatMessage { session_id: Uuid, message: String },
    Typing { session_id: Uuid },
    StopTyping { session_id: Uuid },
}

impl RelayCommand {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::JoinSession { session_id }
            | Self::LeaveSession { session_id }
            | Self::ChatMessage { session_id, .. }
            | Self::Typing { session_id }
            | Self::StopTyping { session_id } => *session_id,
        }
    }
}

/// Events sent FROM server TO client over the herf relay socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RelayEvent {
    /// A command was rejected. The socket stays open.
    Error { message: String },

    UserJoined {
        user: UserSummary,
        timestamp: DateTime<Utc>,
    },

    UserLeft {
        user: UserSummary,
        timestamp: DateTime<Utc>,
    },

    /// Sent only to the joining connection: newest 100 messages, oldest first.
    ChatHistory { messages: Vec<ChatMessage> },

    NewMessage { message: ChatMessage },

    UserTyping { user_id: Uuid, username: String },

    UserStopTyping { user_id: Uuid, username: String },
}

impl RelayEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
}
