// 业务服务层 - 收件箱、聊天事件去重、实时推送与数据清理

pub mod chat_event_dedup;
pub mod inbox_service;
pub mod push_service;
pub mod retention_scheduler;

pub use chat_event_dedup::{ChatEventDedup, ChatEventDedupStore, MemoryChatEventDedupStore};
pub use inbox_service::{
    InboxMessage, InboxMessageType, InboxService, InboxStore, MemoryInboxStore, NewInboxMessage,
};
pub use push_service::{events, BroadcastReport, PushService};
pub use retention_scheduler::{RetentionReport, RetentionScheduler};
