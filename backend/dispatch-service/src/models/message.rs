use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "inbound" => MessageDirection::Inbound,
            _ => MessageDirection::Outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
    Template,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Media => "media",
            MessageType::Template => "template",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "media" => MessageType::Media,
            "template" => MessageType::Template,
            _ => MessageType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Received => "received",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "sent" => MessageStatus::Sent,
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            "failed" => MessageStatus::Failed,
            _ => MessageStatus::Received,
        }
    }
}

/// One unit of communication, persisted in `messages`.
///
/// `wa_message_id` is assigned by the channel and present iff the message
/// made it out (status sent/delivered/read). Inbound messages carry the id
/// the channel delivered them under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub wa_message_id: Option<String>,
    pub user_id: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub error_reason: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for persisting a message; the local id is assigned at insert time.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub wa_message_id: Option<String>,
    pub user_id: String,
    pub direction: MessageDirection,
    pub message_type: MessageType,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    pub error_reason: Option<String>,
    pub campaign_id: Option<Uuid>,
}

impl NewMessage {
    pub fn outbound_text(user_id: &str, body: &str) -> Self {
        Self {
            wa_message_id: None,
            user_id: user_id.to_string(),
            direction: MessageDirection::Outbound,
            message_type: MessageType::Text,
            body: body.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            error_reason: None,
            campaign_id: None,
        }
    }

    pub fn inbound(user_id: &str, wa_message_id: &str, message_type: MessageType, body: &str) -> Self {
        Self {
            wa_message_id: Some(wa_message_id.to_string()),
            user_id: user_id.to_string(),
            direction: MessageDirection::Inbound,
            message_type,
            body: body.to_string(),
            timestamp: Utc::now(),
            status: MessageStatus::Received,
            error_reason: None,
            campaign_id: None,
        }
    }
}
