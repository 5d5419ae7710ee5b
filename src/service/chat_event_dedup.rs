use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;

/// 去重标记存储：同一 (chat_id, run_id) 只有第一次插入返回 true
#[async_trait]
pub trait ChatEventDedupStore: Send + Sync {
    async fn insert_if_absent(&self, chat_id: &str, run_id: &str) -> Result<bool>;
}

/// 内存去重存储
#[derive(Default)]
pub struct MemoryChatEventDedupStore {
    marks: DashMap<(String, String), chrono::DateTime<Utc>>,
}

impl MemoryChatEventDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatEventDedupStore for MemoryChatEventDedupStore {
    async fn insert_if_absent(&self, chat_id: &str, run_id: &str) -> Result<bool> {
        match self.marks.entry((chat_id.to_string(), run_id.to_string())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Ok(true)
            }
        }
    }
}

/// 内部聊天事件去重
pub struct ChatEventDedup {
    store: Arc<dyn ChatEventDedupStore>,
}

impl ChatEventDedup {
    pub fn new(store: Arc<dyn ChatEventDedupStore>) -> Self {
        Self { store }
    }

    /// 首次出现返回 true；任一字段为空直接返回 false
    pub async fn mark_if_first(&self, chat_id: &str, run_id: &str) -> Result<bool> {
        let (chat_id, run_id) = (chat_id.trim(), run_id.trim());
        if chat_id.is_empty() || run_id.is_empty() {
            return Ok(false);
        }
        let first = self.store.insert_if_absent(chat_id, run_id).await?;
        if !first {
            debug!("重复的聊天事件: chat_id={}, run_id={}", chat_id, run_id);
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedup() -> Arc<ChatEventDedup> {
        Arc::new(ChatEventDedup::new(Arc::new(MemoryChatEventDedupStore::new())))
    }

    #[tokio::test]
    async fn test_mark_if_first() {
        let dedup = dedup();
        assert!(dedup.mark_if_first("chat-1", "run-1").await.unwrap());
        assert!(!dedup.mark_if_first("chat-1", "run-1").await.unwrap());
        assert!(!dedup.mark_if_first(" chat-1 ", "run-1 ").await.unwrap());
        assert!(dedup.mark_if_first("chat-1", "run-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_ids_never_first() {
        let dedup = dedup();
        assert!(!dedup.mark_if_first("", "run").await.unwrap());
        assert!(!dedup.mark_if_first("chat", "  ").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_get_one_first() {
        let dedup = dedup();
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let dedup = dedup.clone();
                tokio::spawn(async move { dedup.mark_if_first("chat", "run").await.unwrap() })
            })
            .collect();

        let mut firsts = 0;
        for handle in handles {
            if handle.await.unwrap() {
                firsts += 1;
            }
        }
        assert_eq!(firsts, 1);
    }
}
