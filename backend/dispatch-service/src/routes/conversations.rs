use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub include_archived: bool,
}

fn default_limit() -> i64 {
    50
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Vec<Conversation>>> {
    let limit = params.limit.clamp(1, 200);
    let conversations = state
        .inbox
        .get_conversations(limit, params.offset.max(0), params.include_archived)
        .await?;
    Ok(Json(conversations))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Conversation>> {
    let conversation = state.inbox.get_conversation(&user_id).await?;
    Ok(Json(conversation))
}

#[derive(Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<PageParams>,
) -> AppResult<Json<Vec<Message>>> {
    let limit = params.limit.clamp(1, 200);
    let messages = state
        .inbox
        .get_user_messages(&user_id, limit, params.offset.max(0))
        .await?;
    Ok(Json(messages))
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<StatusCode> {
    if !state.inbox.mark_conversation_read(&user_id).await? {
        return Err(AppError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
