use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessageDirection;

/// Per-counterparty rollup, one row per `user_id`.
///
/// `unread_count` only moves up on inbound messages and only resets through
/// the explicit mark-read call; `total_messages` counts every message folded
/// into this conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user_id: String,
    pub last_message: String,
    pub last_message_timestamp: DateTime<Utc>,
    pub last_message_direction: MessageDirection,
    pub unread_count: i32,
    pub total_messages: i64,
    pub is_archived: bool,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
