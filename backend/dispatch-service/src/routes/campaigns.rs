use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Campaign, Contact};
use crate::services::dispatcher::{validate_contacts, CampaignRequest, DispatchReport};
use crate::state::AppState;
use crate::websocket::NotificationEvent;

pub async fn dispatch_campaign(
    State(state): State<AppState>,
    Json(request): Json<CampaignRequest>,
) -> AppResult<Json<DispatchReport>> {
    let hub = state.hub.clone();
    let progress = Box::new(move |campaign_id: Uuid, progress| {
        let hub = hub.clone();
        tokio::spawn(async move {
            hub.broadcast(&NotificationEvent::CampaignProgress {
                campaign_id,
                progress,
            })
            .await;
        });
    });

    let report = state.dispatcher.dispatch(request, Some(progress)).await?;
    Ok(Json(report))
}

pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Campaign>> {
    let campaign = state.dispatcher.get_campaign(id).await?;
    Ok(Json(campaign))
}

#[derive(Serialize)]
pub struct ValidationReport {
    pub valid_count: usize,
    pub invalid_count: usize,
    pub errors: Vec<String>,
}

pub async fn validate_campaign_contacts(
    Json(contacts): Json<Vec<Contact>>,
) -> Json<ValidationReport> {
    let (valid, errors) = validate_contacts(&contacts);
    Json(ValidationReport {
        valid_count: valid.len(),
        invalid_count: errors.len(),
        errors,
    })
}
