use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::{MessageStatus, MessageType};
use crate::state::AppState;
use crate::websocket::NotificationEvent;

#[derive(Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: String,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: String,
    #[serde(rename = "hub.challenge")]
    pub challenge: String,
}

/// Subscription handshake: echo the challenge iff the token matches.
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> AppResult<String> {
    if params.mode == "subscribe" && params.verify_token == state.config.webhook_verify_token {
        debug!("webhook subscription verified");
        return Ok(params.challenge);
    }
    warn!(mode = %params.mode, "webhook verification rejected");
    Err(AppError::Unauthorized)
}

/// Inbound channel events: new messages and delivery receipts.
///
/// The response is always 200 once the signature clears; a partial
/// processing failure is logged rather than surfaced, because a non-2xx
/// makes the channel redeliver the whole batch.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    if state.config.channel.app_secret.is_some() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !state.channel.verify_webhook_signature(&body, signature) {
            warn!("webhook signature mismatch");
            return Err(AppError::Unauthorized);
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {e}")))?;

    for entry in payload["entry"].as_array().into_iter().flatten() {
        for change in entry["changes"].as_array().into_iter().flatten() {
            let value = &change["value"];

            for message in value["messages"].as_array().into_iter().flatten() {
                if let Err(e) = ingest_message(&state, message).await {
                    warn!(error = %e, "failed to ingest inbound message");
                }
            }

            for status in value["statuses"].as_array().into_iter().flatten() {
                if let Err(e) = apply_status(&state, status).await {
                    warn!(error = %e, "failed to apply status update");
                }
            }
        }
    }

    Ok(Json(json!({ "status": "received" })))
}

async fn ingest_message(state: &AppState, message: &Value) -> AppResult<()> {
    let Some(from) = message["from"].as_str() else {
        return Err(AppError::BadRequest("message without sender".into()));
    };
    let Some(wa_message_id) = message["id"].as_str() else {
        return Err(AppError::BadRequest("message without id".into()));
    };

    let kind = message["type"].as_str().unwrap_or("text");
    let (message_type, body) = match kind {
        "text" => (
            MessageType::Text,
            message["text"]["body"].as_str().unwrap_or_default().to_string(),
        ),
        other => {
            let caption = message[other]["caption"].as_str();
            (
                MessageType::Media,
                caption.map(str::to_owned).unwrap_or_else(|| format!("[{other}]")),
            )
        }
    };

    let Some(saved) = state
        .inbox
        .ingest_inbound_message(from, wa_message_id, message_type, &body)
        .await?
    else {
        return Ok(());
    };

    // Best-effort read receipt back to the sender
    let channel = state.channel.clone();
    let id = wa_message_id.to_string();
    tokio::spawn(async move {
        channel.mark_message_as_read(&id).await;
    });

    state
        .hub
        .broadcast(&NotificationEvent::MessageReceived {
            message: saved.clone(),
        })
        .await;

    if let Ok(conversation) = state.inbox.get_conversation(&saved.user_id).await {
        state
            .hub
            .broadcast(&NotificationEvent::ConversationUpdated { conversation })
            .await;
    }
    Ok(())
}

async fn apply_status(state: &AppState, status: &Value) -> AppResult<()> {
    let Some(wa_message_id) = status["id"].as_str() else {
        return Err(AppError::BadRequest("status without message id".into()));
    };
    let Some(new_status) = status["status"].as_str() else {
        return Err(AppError::BadRequest("status without value".into()));
    };

    let parsed = MessageStatus::from_str(new_status);
    let error_reason = status["errors"][0]["title"].as_str();

    if state
        .inbox
        .update_message_status(wa_message_id, parsed, error_reason)
        .await?
    {
        state
            .hub
            .broadcast(&NotificationEvent::MessageStatus {
                wa_message_id: wa_message_id.to_string(),
                status: parsed,
            })
            .await;
    } else {
        debug!(wa_message_id, "status for unknown message ignored");
    }
    Ok(())
}
