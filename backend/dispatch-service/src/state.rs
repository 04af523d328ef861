use crate::{
    cache::Cache,
    config::Config,
    services::channel::ChannelClient,
    services::dispatcher::CampaignDispatcher,
    services::inbox::InboxService,
    websocket::NotificationHub,
};
use sqlx::{Pool, Postgres};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Pool<Postgres>,
    pub hub: NotificationHub,
    pub channel: Arc<ChannelClient>,
    pub inbox: InboxService,
    pub dispatcher: CampaignDispatcher,
    pub cache: Cache,
    pub config: Arc<Config>,
}
