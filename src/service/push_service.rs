//! 实时推送服务
//!
//! 把事件封装为 `{type, timestamp, payload}` 后推给所有已连接的 App。
//! 单个连接失败只记录日志，不影响其他连接。

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::infra::connection_manager::ConnectionManager;

/// 推送事件类型
pub mod events {
    pub const SYSTEM_PING: &str = "system.ping";
    pub const INBOX_NEW: &str = "inbox.new";
    pub const INBOX_SYNC: &str = "inbox.sync";
    pub const CHAT_NEW_CONTENT: &str = "chat.new_content";
    pub const REALTIME_EVENT: &str = "realtime.event";
}

/// 单次广播结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// 构造推送信封
pub fn envelope(event_type: &str, payload: Value) -> String {
    let payload = if payload.is_null() { json!({}) } else { payload };
    json!({
        "type": event_type,
        "timestamp": Utc::now().timestamp_millis(),
        "payload": payload,
    })
    .to_string()
}

/// 推送服务
pub struct PushService {
    connections: Arc<ConnectionManager>,
}

impl PushService {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// 广播给所有连接
    pub fn broadcast(&self, event_type: &str, payload: Value) -> BroadcastReport {
        let text = envelope(event_type, payload);
        let mut report = BroadcastReport::default();

        for binding in self.connections.snapshot() {
            if !binding.connection.is_open() {
                report.skipped += 1;
                continue;
            }
            match binding.connection.send_text(&text) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "⚠️ 推送失败: connection={}, type={}, error={}",
                        binding.connection_id, event_type, e
                    );
                }
            }
        }

        crate::infra::metrics::record_broadcast(event_type, report.delivered, report.failed);
        debug!(
            "📣 广播 {}: delivered={}, failed={}, skipped={}",
            event_type, report.delivered, report.failed, report.skipped
        );
        report
    }

    /// 只发给一个连接
    pub fn send_to(&self, connection_id: Uuid, event_type: &str, payload: Value) -> bool {
        let Some(binding) = self.connections.get(connection_id) else {
            return false;
        };
        match binding.connection.send_text(&envelope(event_type, payload)) {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ 推送失败: connection={}, error={}", connection_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::models::AppPrincipal;
    use crate::error::{Result, ServerError};
    use crate::infra::connection_manager::{ChannelConnection, PushConnection};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingConnection;

    impl PushConnection for FailingConnection {
        fn is_open(&self) -> bool {
            true
        }
        fn send_text(&self, _text: &str) -> Result<()> {
            Err(ServerError::Internal("broken pipe".to_string()))
        }
    }

    struct ClosedConnection(AtomicBool);

    impl PushConnection for ClosedConnection {
        fn is_open(&self) -> bool {
            false
        }
        fn send_text(&self, _text: &str) -> Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn principal() -> AppPrincipal {
        AppPrincipal {
            username: "app".to_string(),
            device_id: Uuid::new_v4(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_envelope_shape() {
        let value: Value = serde_json::from_str(&envelope("inbox.sync", json!({"unreadCount": 3}))).unwrap();
        assert_eq!(value["type"], "inbox.sync");
        assert_eq!(value["payload"]["unreadCount"], 3);
        assert!(value["timestamp"].as_i64().unwrap() > 0);

        let value: Value = serde_json::from_str(&envelope("system.ping", Value::Null)).unwrap();
        assert_eq!(value["payload"], json!({}));
    }

    #[tokio::test]
    async fn test_broadcast_survives_failing_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let push = PushService::new(manager.clone());

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (conn, rx) = ChannelConnection::new(8);
            manager.register(Uuid::new_v4(), Arc::new(conn), principal());
            receivers.push(rx);
        }
        manager.register(Uuid::new_v4(), Arc::new(FailingConnection), principal());
        let closed = Arc::new(ClosedConnection(AtomicBool::new(false)));
        manager.register(Uuid::new_v4(), closed.clone(), principal());

        let report = push.broadcast(events::CHAT_NEW_CONTENT, json!({"chatId": "c"}));
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 3,
                failed: 1,
                skipped: 1
            }
        );
        assert!(!closed.0.load(Ordering::SeqCst));

        for rx in receivers.iter_mut() {
            let text = rx.recv().await.unwrap();
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "chat.new_content");
        }
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let manager = Arc::new(ConnectionManager::new());
        let push = PushService::new(manager.clone());
        let (a, mut rx_a) = ChannelConnection::new(8);
        let (b, mut rx_b) = ChannelConnection::new(8);
        let id_a = Uuid::new_v4();
        manager.register(id_a, Arc::new(a), principal());
        manager.register(Uuid::new_v4(), Arc::new(b), principal());

        assert!(push.send_to(id_a, events::SYSTEM_PING, json!({"ts": 1})));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
        assert!(!push.send_to(Uuid::new_v4(), events::SYSTEM_PING, Value::Null));
    }
}
