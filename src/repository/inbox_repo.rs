use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::service::inbox_service::{InboxMessage, InboxMessageType, InboxStore};

const INBOX_COLUMNS: &str =
    "message_id, title, content, message_type, payload, sender, read_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct InboxRow {
    message_id: Uuid,
    title: String,
    content: String,
    message_type: String,
    payload: Option<Value>,
    sender: String,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<InboxRow> for InboxMessage {
    fn from(row: InboxRow) -> Self {
        InboxMessage {
            message_id: row.message_id,
            title: row.title,
            content: row.content,
            message_type: InboxMessageType::normalize(Some(&row.message_type)),
            sender: row.sender,
            payload: row
                .payload
                .filter(Value::is_object)
                .unwrap_or_else(|| Value::Object(Default::default())),
            read: row.read_at.is_some(),
            read_at: row.read_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// 收件箱仓库（PostgreSQL）
pub struct PgInboxRepository {
    pool: Arc<PgPool>,
}

impl PgInboxRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboxStore for PgInboxRepository {
    async fn insert(&self, message: &InboxMessage) -> Result<()> {
        // 空对象负载存为 NULL
        let payload = message
            .payload
            .as_object()
            .filter(|o| !o.is_empty())
            .map(|_| message.payload.clone());
        sqlx::query(&format!(
            "INSERT INTO inbox_messages ({INBOX_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $7)"
        ))
        .bind(message.message_id)
        .bind(&message.title)
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(payload)
        .bind(&message.sender)
        .bind(message.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("写入收件箱消息失败: {}", e)))?;
        Ok(())
    }

    async fn list(&self, unread_only: bool, limit: i64) -> Result<Vec<InboxMessage>> {
        let filter = if unread_only { "WHERE read_at IS NULL" } else { "" };
        let sql = format!(
            "SELECT {INBOX_COLUMNS} FROM inbox_messages {filter} ORDER BY created_at DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, InboxRow>(&sql)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询收件箱失败: {}", e)))?;
        Ok(rows.into_iter().map(InboxMessage::from).collect())
    }

    async fn unread_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM inbox_messages WHERE read_at IS NULL")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询未读数失败: {}", e)))
    }

    async fn mark_read(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_messages SET read_at = COALESCE(read_at, $1), updated_at = $1 \
             WHERE message_id = ANY($2)",
        )
        .bind(now)
        .bind(ids)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("标记已读失败: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn mark_all_read(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE inbox_messages SET read_at = COALESCE(read_at, $1), updated_at = $1 \
             WHERE read_at IS NULL",
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("全部标记已读失败: {}", e)))?;
        Ok(result.rows_affected())
    }
}
