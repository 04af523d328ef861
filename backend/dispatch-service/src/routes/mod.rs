use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

pub mod campaigns;
pub mod conversations;
pub mod messages;
pub mod templates;
pub mod webhook;

use campaigns::{dispatch_campaign, get_campaign, validate_campaign_contacts};
use conversations::{
    get_conversation, get_conversation_messages, list_conversations, mark_conversation_read,
};
use messages::{search_messages, send_message};
use templates::list_templates;
use webhook::{receive_webhook, verify_webhook};

async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable")
        }
    }
}

pub fn build_router() -> Router<AppState> {
    // The channel calls back without the version prefix
    let public = Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_webhook).post(receive_webhook));

    let api_v1 = Router::new()
        .route("/messages/send", post(send_message))
        .route("/messages/search", get(search_messages))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{user_id}", get(get_conversation))
        .route(
            "/conversations/{user_id}/messages",
            get(get_conversation_messages),
        )
        .route("/conversations/{user_id}/read", post(mark_conversation_read))
        .route("/campaigns", post(dispatch_campaign))
        .route("/campaigns/validate-contacts", post(validate_campaign_contacts))
        .route("/campaigns/{id}", get(get_campaign))
        .route("/templates", get(list_templates))
        .route("/ws", get(crate::websocket::handler::ws_handler));

    public.merge(Router::new().nest("/api/v1", api_v1))
}
