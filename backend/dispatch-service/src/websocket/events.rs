use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{Conversation, Message, MessageStatus};
use crate::services::dispatcher::DispatchProgress;

/// Everything the live feed can tell a connected client.
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    MessageReceived { message: Message },
    MessageSent { message: Message },
    MessageStatus {
        wa_message_id: String,
        status: MessageStatus,
    },
    ConversationUpdated { conversation: Conversation },
    CampaignProgress {
        campaign_id: Uuid,
        progress: DispatchProgress,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::MessageReceived { .. } => "message.received",
            NotificationEvent::MessageSent { .. } => "message.sent",
            NotificationEvent::MessageStatus { .. } => "message.status",
            NotificationEvent::ConversationUpdated { .. } => "conversation.updated",
            NotificationEvent::CampaignProgress { .. } => "campaign.progress",
        }
    }

    /// Wire shape: a flat object with `type` alongside the event's fields.
    pub fn to_payload(&self) -> Value {
        let mut payload = match self {
            NotificationEvent::MessageReceived { message }
            | NotificationEvent::MessageSent { message } => json!({ "message": message }),
            NotificationEvent::MessageStatus {
                wa_message_id,
                status,
            } => json!({
                "wa_message_id": wa_message_id,
                "status": status,
            }),
            NotificationEvent::ConversationUpdated { conversation } => {
                json!({ "conversation": conversation })
            }
            NotificationEvent::CampaignProgress {
                campaign_id,
                progress,
            } => json!({
                "campaign_id": campaign_id,
                "processed": progress.processed,
                "total": progress.total,
                "successful": progress.successful,
                "failed": progress.failed,
            }),
        };
        payload["type"] = json!(self.event_type());
        payload
    }
}
