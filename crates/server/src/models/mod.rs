//! Data model for the relay server.
//!
//! Wire payloads exchanged over the WebSocket plus the rows of the
//! directory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status code carried on delivered message frames.
pub const STATUS_DELIVERED: i64 = 1;

/// Inbound chat payload, one JSON object per WebSocket text frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub conversation_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub image_key: Option<String>,
}

fn default_kind() -> String {
    "text".to_string()
}

/// How a raw frame failed to become an `InboundMessage`. The two cases
/// produce different error replies, so they stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Frame is not valid JSON at all.
    Invalid,
    /// Valid JSON, but `conversation_id` is missing or not a string.
    MissingFields,
}

impl InboundMessage {
    /// Two-stage parse: JSON validity first, then the required fields.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(raw).map_err(|_| ParseError::Invalid)?;
        serde_json::from_value(value).map_err(|_| ParseError::MissingFields)
    }
}

/// A persisted chat message. Written exactly once per accepted inbound
/// message and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
    pub image_key: Option<String>,
}

/// A user row as seen by the relay: identity plus display attributes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub profile_photo: Option<String>,
    pub background_image: Option<String>,
    pub privacy_settings_id: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// A conversation row. `owner_id` is the user the block check runs against.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub conversation_type: String,
    pub name: Option<String>,
    pub owner_id: String,
    pub group_image: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Membership of one user in one conversation. A row with `deleted` set
/// counts as not-a-participant for authorization and fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Enriched message frame delivered to participants: the stored row plus a
/// snapshot of the sender's profile taken at broadcast time, so display
/// data is current as of delivery rather than as of send.
///
/// Profile fields serialize as `null` when the sender row is absent; the
/// frame shape never changes.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: String,
    pub sender_id: String,
    pub conversation_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub status: i64,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub bio: Option<String>,
    pub profile_photo: Option<String>,
    pub background_image: Option<String>,
    pub privacy_settings_id: Option<String>,
    pub image_key: Option<String>,
}

impl MessageView {
    pub fn new(message: &StoredMessage, sender: Option<&UserProfile>) -> Self {
        Self {
            id: message.id.clone(),
            sender_id: message.sender_id.clone(),
            conversation_id: message.conversation_id.clone(),
            content: message.content.clone(),
            kind: message.kind.clone(),
            created_at: message.created_at,
            status: STATUS_DELIVERED,
            first_name: sender.and_then(|s| s.first_name.clone()),
            last_name: sender.and_then(|s| s.last_name.clone()),
            username: sender.and_then(|s| s.username.clone()),
            email: sender.and_then(|s| s.email.clone()),
            phone_number: sender.and_then(|s| s.phone_number.clone()),
            bio: sender.and_then(|s| s.bio.clone()),
            profile_photo: sender.and_then(|s| s.profile_photo.clone()),
            background_image: sender.and_then(|s| s.background_image.clone()),
            privacy_settings_id: sender.and_then(|s| s.privacy_settings_id.clone()),
            image_key: message.image_key.clone(),
        }
    }
}

/// Structured error frame sent back to the originating session only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub status: String,
    pub message: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
        }
    }
}
