//! Wire protocol types for the two live channels.
//!
//! Inbound: chat frames on `/ws/{user_id}` (chat, typing, read).
//! Outbound: chat, typing, notification, read_receipt and error, always a JSON
//! object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{MessageRow, NotificationRow};

// ═══════════════════════════════════════════════════════════════
// Client → Server frames
// ═══════════════════════════════════════════════════════════════

/// Where a chat message should go. Either a user directly, or whoever
/// represents a constituency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    User(i32),
    Constituency(String),
}

impl Recipient {
    /// `recipient_id` wins when both are given.
    pub fn from_parts(
        recipient_id: Option<i32>,
        constituency: Option<String>,
    ) -> Result<Self, FrameError> {
        match (recipient_id, constituency) {
            (Some(id), _) => Ok(Recipient::User(id)),
            (None, Some(c)) if !c.trim().is_empty() => Ok(Recipient::Constituency(c)),
            _ => Err(FrameError::MissingField("recipient_id")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatFrame {
    pub recipient: Recipient,
    pub content: String,
}

/// A decoded inbound frame on the messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Chat(ChatFrame),
    Typing { recipient_id: i32 },
    Read { message_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("unknown frame type '{0}'")]
    UnknownType(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),
}

/// Loose shape of every inbound frame; validated into [`ClientFrame`].
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    recipient_id: Option<i32>,
    constituency: Option<String>,
    content: Option<String>,
    message_id: Option<i32>,
}

impl ClientFrame {
    /// Decode a text frame. A frame without `type` is a chat message.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;

        match raw.kind.as_deref() {
            None | Some("chat") | Some("message") => {
                let recipient = Recipient::from_parts(raw.recipient_id, raw.constituency)?;
                let content = raw.content.ok_or(FrameError::MissingField("content"))?;
                Ok(ClientFrame::Chat(ChatFrame { recipient, content }))
            }
            Some("typing") => Ok(ClientFrame::Typing {
                recipient_id: raw
                    .recipient_id
                    .ok_or(FrameError::MissingField("recipient_id"))?,
            }),
            Some("read") => Ok(ClientFrame::Read {
                message_id: raw.message_id.ok_or(FrameError::MissingField("message_id"))?,
            }),
            Some(other) => Err(FrameError::UnknownType(other.to_owned())),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Server → Client pushes
// ═══════════════════════════════════════════════════════════════

/// Top-level envelope to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Chat(ChatPush),
    Typing(TypingPush),
    Notification(NotificationPush),
    ReadReceipt(ReadReceiptPush),
    Error(ServerErrorMsg),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error(ServerErrorMsg {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Chat(_) => "chat",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::Notification(_) => "notification",
            ServerEvent::ReadReceipt(_) => "read_receipt",
            ServerEvent::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatPush {
    pub id: i32,
    pub sender_id: i32,
    pub recipient_id: i32,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&MessageRow> for ChatPush {
    fn from(row: &MessageRow) -> Self {
        Self {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            content: row.content.clone(),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingPush {
    pub sender_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPush {
    pub id: i32,
    pub user_id: i32,
    pub content: String,
    pub is_read: bool,
    pub post_id: Option<i32>,
    pub group_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl From<&NotificationRow> for NotificationPush {
    fn from(row: &NotificationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            content: row.message.clone(),
            is_read: row.is_read,
            post_id: row.post_id,
            group_id: row.group_id,
            created_at: row.created_at,
        }
    }
}

/// Sent to a message's sender when the recipient reads it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadReceiptPush {
    pub message_id: i32,
    pub reader_id: i32,
}

/// Sent on protocol errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerErrorMsg {
    pub code: String,
    pub message: String,
}
