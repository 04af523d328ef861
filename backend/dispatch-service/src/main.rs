use dispatch_service::services::channel::ChannelClient;
use dispatch_service::services::dispatcher::CampaignDispatcher;
use dispatch_service::services::inbox::InboxService;
use dispatch_service::websocket::NotificationHub;
use dispatch_service::{cache, config, db, error, logging, rate_limit, routes, state::AppState};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let pool = db::init_pool(&cfg.database_url)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    // Schema must be in sync before anything touches the tables
    db::MIGRATOR
        .run(&pool)
        .await
        .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;

    let redis_client = redis::Client::open(cfg.redis_url.as_str())
        .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
    let redis = ConnectionManager::new(redis_client)
        .await
        .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;

    let limiter = Arc::new(rate_limit::RateLimiter::new(
        redis.clone(),
        cfg.max_messages_per_second,
        1,
    ));
    let cache = cache::Cache::new(redis);
    let channel = Arc::new(ChannelClient::new(
        cfg.channel.clone(),
        limiter,
        Some(cache.clone()),
    )?);

    let inbox = InboxService::new(pool.clone());
    let dispatcher = CampaignDispatcher::new(
        pool.clone(),
        channel.clone(),
        inbox.clone(),
        Duration::from_millis(cfg.message_delay_ms),
        cfg.channel.default_country_code.clone(),
    );

    let state = AppState {
        db: pool,
        hub: NotificationHub::new(),
        channel,
        inbox,
        dispatcher,
        cache,
        config: cfg.clone(),
    };

    let app = routes::build_router().with_state(state);

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting dispatch-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
