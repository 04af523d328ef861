use dotenvy::dotenv;
use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub api_base: String,
    pub access_token: String,
    pub phone_number_id: String,
    pub business_account_id: Option<String>,
    pub app_secret: Option<String>,
    /// Prefixed onto bare 10-digit numbers. Deployment policy, not a format rule.
    pub default_country_code: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,
    pub channel: ChannelConfig,
    pub webhook_verify_token: String,
    /// Outbound sends admitted per one-second slot
    pub max_messages_per_second: u32,
    /// Pause between recipients inside a single campaign
    pub message_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(8000);

        let access_token = env::var("WHATSAPP_ACCESS_TOKEN")
            .map_err(|_| AppError::Config("WHATSAPP_ACCESS_TOKEN missing".into()))?;
        let phone_number_id = env::var("WHATSAPP_PHONE_NUMBER_ID")
            .map_err(|_| AppError::Config("WHATSAPP_PHONE_NUMBER_ID missing".into()))?;

        let api_base = env::var("WHATSAPP_API_BASE")
            .unwrap_or_else(|_| "https://graph.facebook.com/v18.0".into());
        let business_account_id = env::var("WHATSAPP_BUSINESS_ACCOUNT_ID").ok();
        let app_secret = env::var("WHATSAPP_APP_SECRET").ok();
        let default_country_code =
            env::var("DEFAULT_COUNTRY_CODE").unwrap_or_else(|_| "91".into());

        let webhook_verify_token =
            env::var("WEBHOOK_VERIFY_TOKEN").unwrap_or_else(|_| "verify_token".into());

        let max_messages_per_second = env::var("MAX_MESSAGES_PER_SECOND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(80);
        let message_delay_ms = env::var("MESSAGE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1000);

        Ok(Self {
            database_url,
            redis_url,
            port,
            channel: ChannelConfig {
                api_base,
                access_token,
                phone_number_id,
                business_account_id,
                app_secret,
                default_country_code,
            },
            webhook_verify_token,
            max_messages_per_second,
            message_delay_ms,
        })
    }

    #[cfg(test)]
    pub fn test_defaults() -> Self {
        Self {
            database_url: "postgres://localhost/test".into(),
            redis_url: "redis://127.0.0.1:6379/0".into(),
            port: 8000,
            channel: ChannelConfig {
                api_base: "https://graph.facebook.com/v18.0".into(),
                access_token: "test-token".into(),
                phone_number_id: "123456".into(),
                business_account_id: None,
                app_secret: Some("test-secret".into()),
                default_country_code: "91".into(),
            },
            webhook_verify_token: "verify_token".into(),
            max_messages_per_second: 80,
            message_delay_ms: 0,
        }
    }
}
