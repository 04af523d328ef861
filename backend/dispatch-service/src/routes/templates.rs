use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::error::AppResult;
use crate::state::AppState;

pub async fn list_templates(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let templates = state.channel.list_templates().await?;
    Ok(Json(templates))
}
