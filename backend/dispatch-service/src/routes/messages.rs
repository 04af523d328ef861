use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppResult;
use crate::models::{Message, MessageDirection, MessageStatus, MessageType, NewMessage};
use crate::services::channel::SendOutcome;
use crate::state::AppState;
use crate::websocket::NotificationEvent;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundPayload {
    Text {
        body: String,
    },
    Template {
        name: String,
        #[serde(default)]
        params: Vec<String>,
        #[serde(default = "default_language")]
        language_code: String,
    },
    Media {
        media_type: String,
        media_ref: String,
        #[serde(default)]
        caption: Option<String>,
    },
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    #[serde(flatten)]
    pub payload: OutboundPayload,
}

#[derive(Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: Message,
}

pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<Response> {
    let to = state.channel.normalize_phone(&request.to);

    let (outcome, body, message_type) = match &request.payload {
        OutboundPayload::Text { body } => (
            state.channel.send_text(&to, body).await,
            body.clone(),
            MessageType::Text,
        ),
        OutboundPayload::Template {
            name,
            params,
            language_code,
        } => (
            state
                .channel
                .send_template(&to, name, params, language_code)
                .await,
            name.clone(),
            MessageType::Template,
        ),
        OutboundPayload::Media {
            media_type,
            media_ref,
            caption,
        } => (
            state
                .channel
                .send_media(&to, media_type, media_ref, caption.as_deref())
                .await,
            caption.clone().unwrap_or_else(|| format!("[{media_type}]")),
            MessageType::Media,
        ),
    };

    match outcome {
        SendOutcome::Sent { message_id } => {
            let message = state
                .inbox
                .save_message(NewMessage {
                    wa_message_id: Some(message_id),
                    user_id: to,
                    direction: MessageDirection::Outbound,
                    message_type,
                    body,
                    timestamp: Utc::now(),
                    status: MessageStatus::Sent,
                    error_reason: None,
                    campaign_id: None,
                })
                .await?;

            state
                .hub
                .broadcast(&NotificationEvent::MessageSent {
                    message: message.clone(),
                })
                .await;

            Ok(Json(SendMessageResponse {
                success: true,
                message,
            })
            .into_response())
        }
        SendOutcome::Failed { reason, error_code } => {
            // Failed attempts are part of the history too
            state
                .inbox
                .save_message(NewMessage {
                    wa_message_id: None,
                    user_id: to,
                    direction: MessageDirection::Outbound,
                    message_type,
                    body,
                    timestamp: Utc::now(),
                    status: MessageStatus::Failed,
                    error_reason: Some(reason.clone()),
                    campaign_id: None,
                })
                .await?;

            let status = error_code
                .and_then(|c| u16::try_from(c).ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY);

            Ok((
                status,
                Json(json!({
                    "success": false,
                    "reason": reason,
                    "error_code": error_code,
                })),
            )
                .into_response())
        }
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

fn default_search_limit() -> i64 {
    50
}

pub async fn search_messages(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = params.limit.clamp(1, 200);
    let messages = state.inbox.search_messages(&params.q, limit).await?;
    Ok(Json(messages))
}
