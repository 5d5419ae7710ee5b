//! 收件箱服务
//!
//! 管理后台发送的消息持久化在这里，App 通过 `/api/app/inbox` 拉取，
//! 推送事件 `inbox.new` / `inbox.sync` 只携带摘要，客户端据此刷新。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ServerError};

pub const MAX_TITLE_LEN: usize = 120;
pub const MAX_CONTENT_LEN: usize = 4000;
pub const MAX_LIST_LIMIT: i64 = 200;
pub const DEFAULT_SENDER: &str = "SYSTEM";

/// 消息类型，未知值归为 INFO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InboxMessageType {
    Info,
    Warn,
    Error,
    System,
}

impl InboxMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxMessageType::Info => "INFO",
            InboxMessageType::Warn => "WARN",
            InboxMessageType::Error => "ERROR",
            InboxMessageType::System => "SYSTEM",
        }
    }

    pub fn normalize(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_uppercase()).as_deref() {
            Some("WARN") => InboxMessageType::Warn,
            Some("ERROR") => InboxMessageType::Error,
            Some("SYSTEM") => InboxMessageType::System,
            _ => InboxMessageType::Info,
        }
    }
}

/// 收件箱消息
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub message_id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: InboxMessageType,
    pub sender: String,
    /// 无负载时为空对象
    pub payload: Value,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 待发送的消息
#[derive(Debug, Clone, Default)]
pub struct NewInboxMessage {
    pub title: String,
    pub content: String,
    pub message_type: Option<String>,
    pub payload: Option<Value>,
    pub sender: Option<String>,
}

/// 收件箱存储
#[async_trait]
pub trait InboxStore: Send + Sync {
    async fn insert(&self, message: &InboxMessage) -> Result<()>;
    /// 按 created_at DESC
    async fn list(&self, unread_only: bool, limit: i64) -> Result<Vec<InboxMessage>>;
    async fn unread_count(&self) -> Result<i64>;
    /// 已读时间只写一次
    async fn mark_read(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64>;
    async fn mark_all_read(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// 内存收件箱
#[derive(Default)]
pub struct MemoryInboxStore {
    messages: DashMap<Uuid, InboxMessage>,
}

impl MemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_where<F: Fn(&InboxMessage) -> bool>(&self, now: DateTime<Utc>, predicate: F) -> u64 {
        let mut changed = 0;
        for mut message in self.messages.iter_mut() {
            if predicate(&message) {
                if message.read_at.is_none() {
                    message.read_at = Some(now);
                    message.read = true;
                }
                message.updated_at = now;
                changed += 1;
            }
        }
        changed
    }
}

#[async_trait]
impl InboxStore for MemoryInboxStore {
    async fn insert(&self, message: &InboxMessage) -> Result<()> {
        self.messages.insert(message.message_id, message.clone());
        Ok(())
    }

    async fn list(&self, unread_only: bool, limit: i64) -> Result<Vec<InboxMessage>> {
        let mut messages: Vec<InboxMessage> = self
            .messages
            .iter()
            .filter(|m| !unread_only || m.read_at.is_none())
            .map(|m| m.value().clone())
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn unread_count(&self) -> Result<i64> {
        Ok(self.messages.iter().filter(|m| m.read_at.is_none()).count() as i64)
    }

    async fn mark_read(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<u64> {
        Ok(self.mark_where(now, |m| ids.contains(&m.message_id)))
    }

    async fn mark_all_read(&self, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.mark_where(now, |m| m.read_at.is_none()))
    }
}

fn normalize_text(value: &str, max_len: usize, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServerError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.chars().take(max_len).collect())
}

/// 收件箱服务
pub struct InboxService {
    store: Arc<dyn InboxStore>,
}

impl InboxService {
    pub fn new(store: Arc<dyn InboxStore>) -> Self {
        Self { store }
    }

    /// 创建消息：标题/内容必填并截断，类型规范化，发送者默认 SYSTEM
    pub async fn create_message(&self, new_message: NewInboxMessage) -> Result<InboxMessage> {
        let title = normalize_text(&new_message.title, MAX_TITLE_LEN, "title")?;
        let content = normalize_text(&new_message.content, MAX_CONTENT_LEN, "content")?;
        let sender = new_message
            .sender
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SENDER)
            .to_string();
        let payload = match new_message.payload {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(value @ Value::Object(_)) => value,
            Some(_) => {
                return Err(ServerError::Validation("payload must be a JSON object".to_string()))
            }
        };

        let now = Utc::now();
        let message = InboxMessage {
            message_id: Uuid::new_v4(),
            title,
            content,
            message_type: InboxMessageType::normalize(new_message.message_type.as_deref()),
            sender,
            payload,
            read: false,
            read_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&message).await?;
        info!("📬 收件箱消息已创建: message_id={}, type={}", message.message_id, message.message_type.as_str());
        Ok(message)
    }

    /// 数量限制在 [1, 200]
    pub async fn list_messages(&self, unread_only: bool, limit: i64) -> Result<Vec<InboxMessage>> {
        self.store
            .list(unread_only, limit.clamp(1, MAX_LIST_LIMIT))
            .await
    }

    pub async fn unread_count(&self) -> Result<i64> {
        self.store.unread_count().await
    }

    pub async fn mark_read(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.mark_read(ids, Utc::now()).await
    }

    pub async fn mark_all_read(&self) -> Result<u64> {
        self.store.mark_all_read(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> InboxService {
        InboxService::new(Arc::new(MemoryInboxStore::new()))
    }

    fn message(title: &str) -> NewInboxMessage {
        NewInboxMessage {
            title: title.to_string(),
            content: "body".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_message_normalizes_fields() {
        let inbox = service();
        let created = inbox
            .create_message(NewInboxMessage {
                title: format!("  {}  ", "t".repeat(200)),
                content: "c".repeat(5000),
                message_type: Some("warn".to_string()),
                payload: Some(json!({"k": 1})),
                sender: Some("   ".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(created.title.chars().count(), 120);
        assert_eq!(created.content.chars().count(), 4000);
        assert_eq!(created.message_type, InboxMessageType::Warn);
        assert_eq!(created.sender, "SYSTEM");
        assert_eq!(created.payload, json!({"k": 1}));
        assert!(!created.read);
    }

    #[tokio::test]
    async fn test_create_message_validation() {
        let inbox = service();
        let err = inbox.create_message(message("  ")).await.unwrap_err();
        assert_eq!(err.detail(), "title is required");

        let mut bad = message("t");
        bad.payload = Some(json!([1, 2]));
        assert!(inbox.create_message(bad).await.is_err());

        let mut unknown = message("t");
        unknown.message_type = Some("DEBUG".to_string());
        let created = inbox.create_message(unknown).await.unwrap();
        assert_eq!(created.message_type, InboxMessageType::Info);
        assert_eq!(created.payload, json!({}));
    }

    #[tokio::test]
    async fn test_read_flow() {
        let inbox = service();
        let a = inbox.create_message(message("a")).await.unwrap();
        let _b = inbox.create_message(message("b")).await.unwrap();
        assert_eq!(inbox.unread_count().await.unwrap(), 2);

        inbox.mark_read(&[a.message_id]).await.unwrap();
        assert_eq!(inbox.unread_count().await.unwrap(), 1);
        let unread = inbox.list_messages(true, 50).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].title, "b");

        let first_read_at = inbox.list_messages(false, 50).await.unwrap()
            .into_iter()
            .find(|m| m.message_id == a.message_id)
            .and_then(|m| m.read_at);
        inbox.mark_all_read().await.unwrap();
        assert_eq!(inbox.unread_count().await.unwrap(), 0);
        let again = inbox.list_messages(false, 50).await.unwrap()
            .into_iter()
            .find(|m| m.message_id == a.message_id)
            .and_then(|m| m.read_at);
        assert_eq!(first_read_at, again);
    }

    #[tokio::test]
    async fn test_list_clamps_limit_and_orders_newest_first() {
        let inbox = service();
        for i in 0..3 {
            inbox.create_message(message(&format!("m{}", i))).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let one = inbox.list_messages(false, 0).await.unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].title, "m2");
        assert_eq!(inbox.list_messages(false, 10_000).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_mark_read_with_empty_ids() {
        let inbox = service();
        assert_eq!(inbox.mark_read(&[]).await.unwrap(), 0);
    }
}
