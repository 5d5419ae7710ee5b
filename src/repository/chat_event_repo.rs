use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::service::chat_event_dedup::ChatEventDedupStore;

/// 聊天事件去重仓库（PostgreSQL），依赖 (chat_id, run_id) 主键
pub struct PgChatEventRepository {
    pool: Arc<PgPool>,
}

impl PgChatEventRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatEventDedupStore for PgChatEventRepository {
    async fn insert_if_absent(&self, chat_id: &str, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO chat_event_dedup (chat_id, run_id, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (chat_id, run_id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(run_id)
        .bind(Utc::now())
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("写入事件去重标记失败: {}", e)))?;
        Ok(result.rows_affected() == 1)
    }
}
