use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, Message, MessageDirection, MessageStatus, MessageType, NewMessage,
};

/// Message history and the per-counterparty conversation rollup.
///
/// Every saved message folds into its conversation in the same transaction,
/// through a single upsert. The counters are incremented in SQL, so
/// concurrent writers cannot lose updates to a read-modify-write race.
#[derive(Clone)]
pub struct InboxService {
    db: Pool<Postgres>,
}

const INSERT_MESSAGE_SQL: &str = r#"
    INSERT INTO messages
        (id, wa_message_id, user_id, direction, message_type, body,
         "timestamp", status, error_reason, campaign_id, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
"#;

impl InboxService {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    /// Persist a message and fold it into its conversation.
    pub async fn save_message(&self, new: NewMessage) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        sqlx::query(INSERT_MESSAGE_SQL)
            .bind(id)
            .bind(&new.wa_message_id)
            .bind(&new.user_id)
            .bind(new.direction.as_str())
            .bind(new.message_type.as_str())
            .bind(&new.body)
            .bind(new.timestamp)
            .bind(new.status.as_str())
            .bind(&new.error_reason)
            .bind(new.campaign_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        fold_conversation(&mut tx, &new).await?;

        tx.commit().await?;
        debug!(message_id = %id, user_id = %new.user_id, "message saved");

        Ok(Message {
            id,
            wa_message_id: new.wa_message_id,
            user_id: new.user_id,
            direction: new.direction,
            message_type: new.message_type,
            body: new.body,
            timestamp: new.timestamp,
            status: new.status,
            error_reason: new.error_reason,
            campaign_id: new.campaign_id,
            created_at: now,
            updated_at: now,
        })
    }

    /// Record an inbound message delivered by the channel webhook.
    ///
    /// The channel retries webhook delivery, so the same `wa_message_id` can
    /// arrive more than once, including concurrently. Dedupe rides on the
    /// unique index over `wa_message_id`: the insert lands at most once and
    /// the conversation folds only when it does.
    pub async fn ingest_inbound_message(
        &self,
        user_id: &str,
        wa_message_id: &str,
        message_type: MessageType,
        body: &str,
    ) -> AppResult<Option<Message>> {
        let new = NewMessage::inbound(user_id, wa_message_id, message_type, body);
        let id = Uuid::new_v4();
        let now = Utc::now();

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(&format!(
            "{INSERT_MESSAGE_SQL} ON CONFLICT (wa_message_id) WHERE wa_message_id IS NOT NULL DO NOTHING"
        ))
        .bind(id)
        .bind(&new.wa_message_id)
        .bind(&new.user_id)
        .bind(new.direction.as_str())
        .bind(new.message_type.as_str())
        .bind(&new.body)
        .bind(new.timestamp)
        .bind(new.status.as_str())
        .bind(&new.error_reason)
        .bind(new.campaign_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            debug!(wa_message_id, "duplicate inbound message ignored");
            return Ok(None);
        }

        fold_conversation(&mut tx, &new).await?;

        tx.commit().await?;
        info!(wa_message_id, user_id, "inbound message recorded");

        Ok(Some(Message {
            id,
            wa_message_id: new.wa_message_id,
            user_id: new.user_id,
            direction: new.direction,
            message_type: new.message_type,
            body: new.body,
            timestamp: new.timestamp,
            status: new.status,
            error_reason: new.error_reason,
            campaign_id: new.campaign_id,
            created_at: now,
            updated_at: now,
        }))
    }

    /// Apply a channel delivery receipt to the message it refers to.
    ///
    /// Receipts are addressed by the channel's message id and do not fold
    /// into the conversation; the message was already counted when it was
    /// saved. Returns false when no message carries that id.
    pub async fn update_message_status(
        &self,
        wa_message_id: &str,
        status: MessageStatus,
        error_reason: Option<&str>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $2, error_reason = COALESCE($3, error_reason), updated_at = NOW()
            WHERE wa_message_id = $1
            "#,
        )
        .bind(wa_message_id)
        .bind(status.as_str())
        .bind(error_reason)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_user_messages(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, wa_message_id, user_id, direction, message_type, body,
                   "timestamp", status, error_reason, campaign_id, created_at, updated_at
            FROM messages
            WHERE user_id = $1
            ORDER BY "timestamp" DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(map_message).collect())
    }

    pub async fn get_conversations(
        &self,
        limit: i64,
        offset: i64,
        include_archived: bool,
    ) -> AppResult<Vec<Conversation>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, last_message, last_message_timestamp, last_message_direction,
                   unread_count, total_messages, is_archived, labels, created_at, updated_at
            FROM conversations
            WHERE is_archived = FALSE OR $3
            ORDER BY last_message_timestamp DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .bind(include_archived)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(map_conversation).collect())
    }

    pub async fn get_conversation(&self, user_id: &str) -> AppResult<Conversation> {
        let row = sqlx::query(
            r#"
            SELECT user_id, last_message, last_message_timestamp, last_message_direction,
                   unread_count, total_messages, is_archived, labels, created_at, updated_at
            FROM conversations
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(map_conversation(&row))
    }

    /// Case-insensitive substring search over message bodies.
    pub async fn search_messages(&self, query: &str, limit: i64) -> AppResult<Vec<Message>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let rows = sqlx::query(
            r#"
            SELECT id, wa_message_id, user_id, direction, message_type, body,
                   "timestamp", status, error_reason, campaign_id, created_at, updated_at
            FROM messages
            WHERE body ILIKE $1
            ORDER BY "timestamp" DESC
            LIMIT $2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.iter().map(map_message).collect())
    }

    /// Reset the unread counter. Returns false if the conversation is unknown.
    pub async fn mark_conversation_read(&self, user_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE conversations SET unread_count = 0, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Apply one message to its conversation rollup inside the caller's
/// transaction. Counter arithmetic stays in SQL so concurrent writers
/// cannot lose updates.
async fn fold_conversation(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    new: &NewMessage,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO conversations
            (user_id, last_message, last_message_timestamp, last_message_direction,
             unread_count, total_messages)
        VALUES ($1, $2, $3, $4, $5, 1)
        ON CONFLICT (user_id) DO UPDATE SET
            last_message = EXCLUDED.last_message,
            last_message_timestamp = EXCLUDED.last_message_timestamp,
            last_message_direction = EXCLUDED.last_message_direction,
            unread_count = conversations.unread_count + $5,
            total_messages = conversations.total_messages + 1,
            updated_at = NOW()
        "#,
    )
    .bind(&new.user_id)
    .bind(preview(&new.body))
    .bind(new.timestamp)
    .bind(new.direction.as_str())
    .bind(unread_increment(new.direction))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

const PREVIEW_CHARS: usize = 500;

/// The conversation keeps a bounded preview of the last message, not the
/// full body.
fn preview(body: &str) -> &str {
    match body.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Only messages from the counterparty count as unread.
fn unread_increment(direction: MessageDirection) -> i32 {
    match direction {
        MessageDirection::Inbound => 1,
        MessageDirection::Outbound => 0,
    }
}

fn map_message(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        wa_message_id: row.get("wa_message_id"),
        user_id: row.get("user_id"),
        direction: MessageDirection::from_str(row.get::<String, _>("direction").as_str()),
        message_type: MessageType::from_str(row.get::<String, _>("message_type").as_str()),
        body: row.get("body"),
        timestamp: row.get::<DateTime<Utc>, _>("timestamp"),
        status: MessageStatus::from_str(row.get::<String, _>("status").as_str()),
        error_reason: row.get("error_reason"),
        campaign_id: row.get("campaign_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn map_conversation(row: &PgRow) -> Conversation {
    Conversation {
        user_id: row.get("user_id"),
        last_message: row.get("last_message"),
        last_message_timestamp: row.get("last_message_timestamp"),
        last_message_direction: MessageDirection::from_str(
            row.get::<String, _>("last_message_direction").as_str(),
        ),
        unread_count: row.get("unread_count"),
        total_messages: row.get("total_messages"),
        is_archived: row.get("is_archived"),
        labels: row.get("labels"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
