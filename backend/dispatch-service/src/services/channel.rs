use hmac::{Hmac, Mac};
use reqwest::header::RETRY_AFTER;
use reqwest::Client;
use resilience::{with_retry, RetryConfig};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::ChannelConfig;
use crate::error::{AppError, AppResult};
use crate::rate_limit::RateLimit;

type HmacSha256 = Hmac<Sha256>;

/// Rate-limit bucket shared by every process sending through this channel.
pub const RATE_BUCKET: &str = "channel";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
const TEMPLATE_CACHE_TTL_SECS: u64 = 3600;

/// Final result of one logical send, after retries are spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    Failed {
        reason: String,
        error_code: Option<i64>,
    },
}

/// Canonical wire form of a phone number: digits only, with the default
/// country code prefixed onto bare 10-digit numbers. Every persisted
/// `user_id` goes through this so all send paths and the webhook key the
/// same conversation.
pub fn normalize_phone(phone: &str, default_country_code: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        format!("{default_country_code}{digits}")
    } else {
        digits
    }
}

/// Classified failure of a single attempt. Transient and rate-limited
/// failures are worth another attempt; permanent ones are not.
#[derive(Debug, thiserror::Error)]
enum SendError {
    #[error("{0}")]
    Transient(String),
    #[error("channel rate limited")]
    RateLimited,
    #[error("{message}")]
    Permanent {
        code: Option<i64>,
        message: String,
    },
}

impl SendError {
    fn is_retryable(&self) -> bool {
        !matches!(self, SendError::Permanent { .. })
    }

    fn error_code(&self) -> Option<i64> {
        match self {
            SendError::RateLimited => Some(429),
            SendError::Permanent { code, .. } => *code,
            SendError::Transient(_) => None,
        }
    }
}

/// Client for the external messaging channel (WhatsApp Business Cloud API).
///
/// Every send consults the shared rate limiter first; a denial comes back as
/// a 429-coded failure without any network I/O. Transient failures are
/// retried with exponential backoff; 4xx responses other than 429 are not.
pub struct ChannelClient {
    http: Client,
    cfg: ChannelConfig,
    base_url: String,
    limiter: Arc<dyn RateLimit>,
    cache: Option<Cache>,
    retry: RetryConfig,
}

impl ChannelClient {
    pub fn new(
        cfg: ChannelConfig,
        limiter: Arc<dyn RateLimit>,
        cache: Option<Cache>,
    ) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("http client: {e}")))?;
        let base_url = format!("{}/{}", cfg.api_base, cfg.phone_number_id);
        Ok(Self {
            http,
            cfg,
            base_url,
            limiter,
            cache,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry schedule (tests shrink the backoff).
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        let payload = json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": self.normalize_phone(to),
            "type": "text",
            "text": { "body": body },
        });
        self.dispatch(payload).await
    }

    pub async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        params: &[String],
        language_code: &str,
    ) -> SendOutcome {
        let mut template = json!({
            "name": template_name,
            "language": { "code": language_code },
        });
        if !params.is_empty() {
            let parameters: Vec<Value> = params
                .iter()
                .map(|p| json!({ "type": "text", "text": p }))
                .collect();
            template["components"] = json!([{ "type": "body", "parameters": parameters }]);
        }

        let payload = json!({
            "messaging_product": "whatsapp",
            "to": self.normalize_phone(to),
            "type": "template",
            "template": template,
        });
        self.dispatch(payload).await
    }

    /// `media_ref` is either a public URL or a previously uploaded media id.
    pub async fn send_media(
        &self,
        to: &str,
        media_type: &str,
        media_ref: &str,
        caption: Option<&str>,
    ) -> SendOutcome {
        if !matches!(media_type, "image" | "video" | "audio" | "document") {
            return SendOutcome::Failed {
                reason: format!("unsupported media type: {media_type}"),
                error_code: None,
            };
        }

        let ref_key = if media_ref.starts_with("http") { "link" } else { "id" };
        let mut media = json!({});
        media[ref_key] = json!(media_ref);
        if let Some(caption) = caption {
            // audio has no caption field in the channel API
            if media_type != "audio" {
                media["caption"] = json!(caption);
            }
        }

        let mut payload = json!({
            "messaging_product": "whatsapp",
            "to": self.normalize_phone(to),
            "type": media_type,
        });
        payload[media_type] = media;
        self.dispatch(payload).await
    }

    /// Acknowledge an inbound message back to the channel. Best-effort.
    pub async fn mark_message_as_read(&self, wa_message_id: &str) -> bool {
        let payload = json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": wa_message_id,
        });

        match self
            .http
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.cfg.access_token)
            .json(&payload)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "failed to mark message as read");
                false
            }
        }
    }

    /// Template metadata for the business account, memoized through the
    /// cache. Cache trouble is treated as a miss, never as a failure.
    pub async fn list_templates(&self) -> AppResult<Value> {
        let waba = self
            .cfg
            .business_account_id
            .as_deref()
            .ok_or_else(|| AppError::Config("WHATSAPP_BUSINESS_ACCOUNT_ID missing".into()))?;
        let cache_key = format!("templates:{waba}");

        if let Some(cache) = &self.cache {
            match cache.get::<Value>(&cache_key).await {
                Ok(Some(cached)) => return Ok(cached),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "template cache read failed"),
            }
        }

        let templates: Value = self
            .http
            .get(format!("{}/{}/message_templates", self.cfg.api_base, waba))
            .bearer_auth(&self.cfg.access_token)
            .send()
            .await
            .map_err(|e| AppError::Channel(format!("template fetch: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::Channel(format!("template parse: {e}")))?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(&cache_key, &templates, TEMPLATE_CACHE_TTL_SECS).await {
                warn!(error = %e, "template cache write failed");
            }
        }
        Ok(templates)
    }

    /// Validate a webhook payload against its `X-Hub-Signature-256` header.
    ///
    /// Missing secret or header yields false, never an error. The comparison
    /// is constant-time.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = self.cfg.app_secret.as_deref() else {
            return false;
        };
        let Some(hex_digest) = signature.strip_prefix("sha256=") else {
            return false;
        };
        let Ok(expected) = hex::decode(hex_digest) else {
            return false;
        };

        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }

    /// Strip formatting and apply the configured default country code to
    /// bare 10-digit numbers.
    pub fn normalize_phone(&self, phone: &str) -> String {
        normalize_phone(phone, &self.cfg.default_country_code)
    }

    async fn dispatch(&self, payload: Value) -> SendOutcome {
        match self.limiter.acquire(RATE_BUCKET).await {
            Ok(true) => {}
            Ok(false) => {
                return SendOutcome::Failed {
                    reason: "Rate limit exceeded".into(),
                    error_code: Some(429),
                }
            }
            // The limiter must not become a point of failure for sends
            Err(e) => warn!(error = %e, "rate limiter unavailable, admitting send"),
        }

        let result = with_retry(&self.retry, SendError::is_retryable, || {
            self.attempt_send(&payload)
        })
        .await;

        match result {
            Ok(message_id) => {
                info!(%message_id, "message sent");
                SendOutcome::Sent { message_id }
            }
            Err(err) => {
                let inner = err.into_inner();
                SendOutcome::Failed {
                    error_code: inner.error_code(),
                    reason: inner.to_string(),
                }
            }
        }
    }

    /// One attempt against the channel, classified for the retry loop.
    async fn attempt_send(&self, payload: &Value) -> Result<String, SendError> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .bearer_auth(&self.cfg.access_token)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Transient("Request timeout".into())
                } else {
                    SendError::Transient(format!("Connection error: {e}"))
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            // Honor the provider's own pacing before the retry loop resumes
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(retry_after, "channel rate limited");
            tokio::time::sleep(Duration::from_secs(retry_after)).await;
            return Err(SendError::RateLimited);
        }

        let body: Value = response.json().await.map_err(|e| {
            if status.is_server_error() {
                SendError::Transient(format!("Malformed 5xx response: {e}"))
            } else {
                SendError::Permanent {
                    code: None,
                    message: format!("malformed response body: {e}"),
                }
            }
        })?;

        if status.is_success() {
            return body["messages"][0]["id"]
                .as_str()
                .map(str::to_owned)
                .ok_or(SendError::Permanent {
                    code: None,
                    message: "response missing message id".into(),
                });
        }

        let code = body["error"]["code"].as_i64();
        let message = body["error"]["message"]
            .as_str()
            .unwrap_or("Unknown error")
            .to_string();

        if status.is_server_error() {
            return Err(SendError::Transient(format!(
                "Server error {}: {message}",
                status.as_u16()
            )));
        }
        warn!(code, %message, "channel rejected send");
        Err(SendError::Permanent { code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AllowAll;
    struct DenyAll;
    struct CountingLimiter(AtomicU32);

    #[async_trait]
    impl RateLimit for AllowAll {
        async fn acquire(&self, _bucket: &str) -> AppResult<bool> {
            Ok(true)
        }
    }

    #[async_trait]
    impl RateLimit for DenyAll {
        async fn acquire(&self, _bucket: &str) -> AppResult<bool> {
            Ok(false)
        }
    }

    #[async_trait]
    impl RateLimit for CountingLimiter {
        async fn acquire(&self, _bucket: &str) -> AppResult<bool> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn client_with(limiter: Arc<dyn RateLimit>, api_base: &str) -> ChannelClient {
        let mut cfg = Config::test_defaults().channel;
        cfg.api_base = api_base.to_string();
        ChannelClient::new(cfg, limiter, None)
            .unwrap()
            .with_retry_config(RetryConfig {
                max_attempts: 3,
                min_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                jitter: false,
            })
    }

    fn test_client() -> ChannelClient {
        client_with(Arc::new(AllowAll), "https://graph.facebook.com/v18.0")
    }

    #[test]
    fn normalize_strips_formatting() {
        let client = test_client();
        assert_eq!(client.normalize_phone("+91 98765-43210"), "919876543210");
    }

    #[test]
    fn normalize_prefixes_bare_ten_digit_numbers() {
        let client = test_client();
        assert_eq!(client.normalize_phone("9876543210"), "919876543210");
        // Already has a country code: left alone
        assert_eq!(client.normalize_phone("919876543210"), "919876543210");
    }

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn verify_accepts_matching_signature() {
        let client = test_client();
        let payload = br#"{"entry":[]}"#;
        let header = sign("test-secret", payload);
        assert!(client.verify_webhook_signature(payload, &header));
    }

    #[test]
    fn verify_rejects_mutated_payload_or_signature() {
        let client = test_client();
        let payload = br#"{"entry":[]}"#;
        let header = sign("test-secret", payload);

        assert!(!client.verify_webhook_signature(br#"{"entry":[1]}"#, &header));
        let mut tampered = header.clone();
        tampered.pop();
        tampered.push('0');
        // May collide with the original final char; flip deterministically
        if tampered == header {
            tampered.pop();
            tampered.push('1');
        }
        assert!(!client.verify_webhook_signature(payload, &tampered));
    }

    #[test]
    fn verify_rejects_empty_or_unprefixed_signature() {
        let client = test_client();
        assert!(!client.verify_webhook_signature(b"payload", ""));
        assert!(!client.verify_webhook_signature(b"payload", "deadbeef"));
    }

    #[test]
    fn verify_rejects_when_secret_missing() {
        let mut cfg = Config::test_defaults().channel;
        cfg.app_secret = None;
        let client = ChannelClient::new(cfg, Arc::new(AllowAll), None).unwrap();
        let header = sign("test-secret", b"payload");
        assert!(!client.verify_webhook_signature(b"payload", &header));
    }

    #[tokio::test]
    async fn denied_send_fails_with_429_without_io() {
        // Unroutable base URL: any network attempt would error differently
        let client = client_with(Arc::new(DenyAll), "http://127.0.0.1:1");
        let outcome = client.send_text("9876543210", "hello").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                reason: "Rate limit exceeded".into(),
                error_code: Some(429),
            }
        );
    }

    #[tokio::test]
    async fn send_text_parses_assigned_message_id() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .and(body_partial_json(json!({
                "to": "919876543210",
                "type": "text",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.ABC123" }]
            })))
            .mount(&server)
            .await;

        let client = client_with(Arc::new(AllowAll), &server.uri());
        let outcome = client.send_text("9876543210", "hello").await;
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                message_id: "wamid.ABC123".into()
            }
        );
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        // Two 500s, then success: attempt 3 wins
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": { "code": 500, "message": "upstream hiccup" }
            })))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.THIRD" }]
            })))
            .mount(&server)
            .await;

        let client = client_with(Arc::new(AllowAll), &server.uri());
        let start = std::time::Instant::now();
        let outcome = client.send_text("9876543210", "hello").await;

        assert_eq!(
            outcome,
            SendOutcome::Sent {
                message_id: "wamid.THIRD".into()
            }
        );
        // Backoff schedule 5ms + 10ms
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "code": 131026, "message": "Receiver incapable" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with(Arc::new(AllowAll), &server.uri());
        let outcome = client.send_text("9876543210", "hello").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                reason: "Receiver incapable".into(),
                error_code: Some(131026),
            }
        );
    }

    #[tokio::test]
    async fn channel_429_waits_retry_after_then_retries() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "0")
                    .set_body_json(json!({
                        "error": { "code": 429, "message": "Too many requests" }
                    })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.AFTER429" }]
            })))
            .mount(&server)
            .await;

        let client = client_with(Arc::new(AllowAll), &server.uri());
        let outcome = client.send_text("9876543210", "hello").await;
        assert_eq!(
            outcome,
            SendOutcome::Sent {
                message_id: "wamid.AFTER429".into()
            }
        );
    }

    #[tokio::test]
    async fn one_send_consumes_one_rate_token() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/123456/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "wamid.ONE" }]
            })))
            .mount(&server)
            .await;

        let limiter = Arc::new(CountingLimiter(AtomicU32::new(0)));
        let client = client_with(limiter.clone(), &server.uri());
        let _ = client.send_text("9876543210", "hello").await;
        // Retries reuse the initial permit; only one acquire per logical send
        assert_eq!(limiter.0.load(Ordering::SeqCst), 1);
    }
}
