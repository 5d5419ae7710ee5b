use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::auth::models::AppPrincipal;
use crate::error::{Result, ServerError};

/// 每个连接的待发送队列长度，满了视为发送失败
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// 可推送的连接
pub trait PushConnection: Send + Sync {
    fn is_open(&self) -> bool;
    fn send_text(&self, text: &str) -> Result<()>;
}

/// 基于 mpsc 的连接句柄，由写任务把队列中的文本写入 WebSocket
pub struct ChannelConnection {
    tx: mpsc::Sender<String>,
}

impl ChannelConnection {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl PushConnection for ChannelConnection {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.tx
            .try_send(text.to_string())
            .map_err(|e| ServerError::Internal(format!("推送队列写入失败: {}", e)))
    }
}

/// 已注册的连接
#[derive(Clone)]
pub struct PushBinding {
    pub connection_id: Uuid,
    pub connection: Arc<dyn PushConnection>,
    pub principal: AppPrincipal,
    pub connected_at: DateTime<Utc>,
}

/// 连接管理器
///
/// 跟踪活跃的 App WebSocket 连接。使用 DashMap（分片锁），广播时只遍历快照。
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<Uuid, PushBinding>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接
    pub fn register(
        &self,
        connection_id: Uuid,
        connection: Arc<dyn PushConnection>,
        principal: AppPrincipal,
    ) {
        debug!(
            "📝 ConnectionManager: 注册连接 connection={}, device={}",
            connection_id, principal.device_id
        );
        self.connections.insert(
            connection_id,
            PushBinding {
                connection_id,
                connection,
                principal,
                connected_at: Utc::now(),
            },
        );
        crate::infra::metrics::record_push_connections(self.connections.len());
    }

    /// 注销连接（重复调用无影响）
    pub fn unregister(&self, connection_id: Uuid) -> Option<PushBinding> {
        let removed = self.connections.remove(&connection_id).map(|(_, v)| v);
        if removed.is_some() {
            debug!("📝 ConnectionManager: 注销连接 connection={}", connection_id);
            crate::infra::metrics::record_push_connections(self.connections.len());
        }
        removed
    }

    /// 当前所有连接的快照
    pub fn snapshot(&self) -> Vec<PushBinding> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, connection_id: Uuid) -> Option<PushBinding> {
        self.connections.get(&connection_id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
