use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Campaign, CampaignStatus, Contact, MessageDirection, MessageStatus, MessageType, NewMessage,
};
use crate::services::channel::{normalize_phone, ChannelClient, SendOutcome};
use crate::services::inbox::InboxService;

/// Outbound side of the campaign loop. `ChannelClient` is the production
/// implementation; tests substitute a recording stub.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome;
    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        params: &[String],
        language_code: &str,
    ) -> SendOutcome;
}

#[async_trait]
impl OutboundSender for ChannelClient {
    async fn send_text(&self, to: &str, body: &str) -> SendOutcome {
        ChannelClient::send_text(self, to, body).await
    }

    async fn send_template(
        &self,
        to: &str,
        template_name: &str,
        params: &[String],
        language_code: &str,
    ) -> SendOutcome {
        ChannelClient::send_template(self, to, template_name, params, language_code).await
    }
}

/// One bulk-send request, already parsed from the API or a contact file.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignRequest {
    pub name: String,
    pub contacts: Vec<Contact>,
    /// Body with `{field}` placeholders resolved per contact.
    pub message_template: String,
    /// When set, an approved channel template is sent instead of free text.
    #[serde(default)]
    pub template_name: Option<String>,
    /// Contact fields supplying the template's body parameters, in order.
    #[serde(default)]
    pub template_params: Vec<String>,
    #[serde(default = "default_language")]
    pub language_code: String,
    /// Pause between recipients, overriding the service default when set.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatchProgress {
    pub processed: u32,
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
}

pub type ProgressFn = Box<dyn Fn(Uuid, DispatchProgress) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub total: u32,
    pub successful: u32,
    pub failed: u32,
    /// Recipients counted in `failed` without a message row: validation
    /// rejections and sends whose row could not be written.
    pub invalid: Vec<String>,
}

/// Runs campaigns: validates the recipient list, walks it at the configured
/// pace and records one message row per attempt. A recipient failure never
/// aborts the campaign; it is counted and the loop moves on.
#[derive(Clone)]
pub struct CampaignDispatcher {
    db: Pool<Postgres>,
    sender: Arc<dyn OutboundSender>,
    inbox: InboxService,
    delay: Duration,
    default_country_code: String,
}

impl CampaignDispatcher {
    pub fn new(
        db: Pool<Postgres>,
        sender: Arc<dyn OutboundSender>,
        inbox: InboxService,
        delay: Duration,
        default_country_code: String,
    ) -> Self {
        Self {
            db,
            sender,
            inbox,
            delay,
            default_country_code,
        }
    }

    pub async fn dispatch(
        &self,
        request: CampaignRequest,
        progress: Option<ProgressFn>,
    ) -> AppResult<DispatchReport> {
        let total = request.contacts.len() as u32;
        let delay = request
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(self.delay);
        let campaign_id = self.create_campaign(&request.name, total as i32).await?;
        info!(%campaign_id, name = %request.name, total, "campaign started");

        let mut successful = 0u32;
        let mut failed = 0u32;
        let mut invalid = Vec::new();

        for (i, contact) in request.contacts.iter().enumerate() {
            // Invalid recipients count as failed without consuming a rate
            // token or touching the channel
            let Some(phone) = sendable_phone(contact) else {
                let reason = format!("row {}: missing/invalid phone number", i + 1);
                warn!(%campaign_id, %reason, "recipient skipped");
                invalid.push(reason);
                failed += 1;
                if let Some(progress) = &progress {
                    progress(campaign_id, DispatchProgress {
                        processed: (i + 1) as u32,
                        total,
                        successful,
                        failed,
                    });
                }
                continue;
            };

            // One canonical form keys messages, conversations and the wire
            let to = normalize_phone(phone, &self.default_country_code);
            let (outcome, body, message_type) = self.send_one(&request, contact, &to).await;

            let record = match &outcome {
                SendOutcome::Sent { message_id } => NewMessage {
                    wa_message_id: Some(message_id.clone()),
                    user_id: to.clone(),
                    direction: MessageDirection::Outbound,
                    message_type,
                    body,
                    timestamp: Utc::now(),
                    status: MessageStatus::Sent,
                    error_reason: None,
                    campaign_id: Some(campaign_id),
                },
                SendOutcome::Failed { reason, .. } => NewMessage {
                    wa_message_id: None,
                    user_id: to.clone(),
                    direction: MessageDirection::Outbound,
                    message_type,
                    body,
                    timestamp: Utc::now(),
                    status: MessageStatus::Failed,
                    error_reason: Some(reason.clone()),
                    campaign_id: Some(campaign_id),
                },
            };

            let persisted = self.inbox.save_message(record).await;

            match outcome {
                // A send with no surviving record cannot be reported
                // successful; the campaign counters answer "which recipients
                // have a sent message row".
                SendOutcome::Sent { .. } => match persisted {
                    Ok(_) => successful += 1,
                    Err(e) => {
                        warn!(%campaign_id, user_id = %to, error = %e, "sent but not recorded, counting as failed");
                        invalid.push(format!("row {}: message not recorded: {e}", i + 1));
                        failed += 1;
                    }
                },
                SendOutcome::Failed { ref reason, .. } => {
                    warn!(%campaign_id, user_id = %to, %reason, "campaign send failed");
                    failed += 1;
                    if let Err(e) = persisted {
                        warn!(%campaign_id, user_id = %to, error = %e, "failed to record campaign message");
                    }
                }
            }

            if let Some(progress) = &progress {
                progress(campaign_id, DispatchProgress {
                    processed: (i + 1) as u32,
                    total,
                    successful,
                    failed,
                });
            }

            if i + 1 < request.contacts.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let status = if successful + failed > 0 {
            CampaignStatus::Completed
        } else {
            CampaignStatus::Failed
        };
        self.finalize_campaign(campaign_id, status, successful as i32, failed as i32)
            .await?;
        info!(%campaign_id, successful, failed, "campaign finished");

        Ok(DispatchReport {
            campaign_id,
            status,
            total,
            successful,
            failed,
            invalid,
        })
    }

    async fn send_one(
        &self,
        request: &CampaignRequest,
        contact: &Contact,
        phone: &str,
    ) -> (SendOutcome, String, MessageType) {
        if let Some(template_name) = &request.template_name {
            let params: Vec<String> = request
                .template_params
                .iter()
                .map(|field| contact.get(field).unwrap_or_default().to_string())
                .collect();
            let outcome = self
                .sender
                .send_template(phone, template_name, &params, &request.language_code)
                .await;
            (outcome, template_name.clone(), MessageType::Template)
        } else {
            let body = personalize(&request.message_template, contact);
            let outcome = self.sender.send_text(phone, &body).await;
            (outcome, body, MessageType::Text)
        }
    }

    async fn create_campaign(&self, name: &str, total_contacts: i32) -> AppResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, total_contacts, status, started_at)
            VALUES ($1, $2, $3, 'running', NOW())
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(total_contacts)
        .execute(&self.db)
        .await?;
        Ok(id)
    }

    async fn finalize_campaign(
        &self,
        id: Uuid,
        status: CampaignStatus,
        successful: i32,
        failed: i32,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2, successful_count = $3, failed_count = $4,
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(successful)
        .bind(failed)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn get_campaign(&self, id: Uuid) -> AppResult<Campaign> {
        let row = sqlx::query(
            r#"
            SELECT id, name, total_contacts, status, successful_count, failed_count,
                   created_at, started_at, completed_at
            FROM campaigns WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(Campaign {
            id: row.get("id"),
            name: row.get("name"),
            total_contacts: row.get("total_contacts"),
            status: CampaignStatus::from_str(row.get::<String, _>("status").as_str()),
            successful_count: row.get("successful_count"),
            failed_count: row.get("failed_count"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

/// The phone a contact can be dispatched to: present and at least 10 digits
/// after cleaning.
fn sendable_phone(contact: &Contact) -> Option<&str> {
    contact
        .phone()
        .filter(|p| p.chars().filter(|c| c.is_ascii_digit()).count() >= 10)
}

/// Split a recipient list into sendable contacts and per-row rejection
/// reasons. Dry run of the same check `dispatch` applies; row numbers are
/// 1-based to match the source file.
pub fn validate_contacts(contacts: &[Contact]) -> (Vec<Contact>, Vec<String>) {
    let mut valid = Vec::with_capacity(contacts.len());
    let mut errors = Vec::new();

    for (i, contact) in contacts.iter().enumerate() {
        if sendable_phone(contact).is_some() {
            valid.push(contact.clone());
        } else {
            errors.push(format!("row {}: missing/invalid phone number", i + 1));
        }
    }
    (valid, errors)
}

/// Resolve `{field}` placeholders against the contact's fields.
///
/// If any placeholder has no matching field, the template is sent verbatim
/// rather than half-rendered.
pub fn personalize(template: &str, contact: &Contact) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            // Unbalanced brace: keep the tail as-is
            out.push_str(&rest[start..]);
            return out;
        };
        let field = &after[..end];
        match contact.get(field) {
            Some(value) => out.push_str(value),
            None => {
                warn!(field, "placeholder missing from contact, sending template verbatim");
                return template.to_string();
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Parse a headed CSV into contacts. Header names become field names.
pub fn contacts_from_csv<R: std::io::Read>(reader: R) -> AppResult<Vec<Contact>> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| AppError::ContactFile(format!("invalid header row: {e}")))?
        .clone();

    let mut contacts = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        let record = record
            .map_err(|e| AppError::ContactFile(format!("row {}: {e}", i + 1)))?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.trim().to_string(), v.trim().to_string()))
            .collect();
        contacts.push(Contact::new(fields));
    }
    Ok(contacts)
}

pub fn load_contacts_from_csv(path: &std::path::Path) -> AppResult<Vec<Contact>> {
    let file = std::fs::File::open(path)
        .map_err(|e| AppError::ContactFile(format!("{}: {e}", path.display())))?;
    contacts_from_csv(file)
}
