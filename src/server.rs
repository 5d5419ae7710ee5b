use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::audit::token_audit::{MemoryTokenAuditStore, TokenAuditLedger, TokenAuditStore};
use crate::auth::key_manager::{KeyManager, KeyStore, MemoryKeyStore};
use crate::auth::{
    AccessControl, AdminSessionStore, DeviceAuthService, DeviceManager, DeviceManagerDb,
    DeviceStore, InternalEventVerifier, JwtService,
};
use crate::config::{ServerConfig, StorageBackend};
use crate::error::{Result, ServerError};
use crate::http::{build_router, AuthHttpServer, HttpServerState};
use crate::infra::connection_manager::ConnectionManager;
use crate::infra::database::Database;
use crate::repository::{
    PgChatEventRepository, PgInboxRepository, PgJwkKeyRepository, PgTokenAuditRepository,
};
use crate::service::chat_event_dedup::{ChatEventDedupStore, MemoryChatEventDedupStore};
use crate::service::inbox_service::{InboxStore, MemoryInboxStore};
use crate::service::{ChatEventDedup, InboxService, PushService, RetentionScheduler};

/// 连接池指标上报间隔
const POOL_METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// 各组件使用的存储实现
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub token_audit: Arc<dyn TokenAuditStore>,
    pub keys: Arc<dyn KeyStore>,
    pub chat_events: Arc<dyn ChatEventDedupStore>,
    pub inbox: Arc<dyn InboxStore>,
}

impl Stores {
    /// 进程内存储，重启后数据丢失（开发/测试）
    pub fn memory(bcrypt_cost: u32) -> Self {
        Self {
            devices: Arc::new(DeviceManager::new(bcrypt_cost)),
            token_audit: Arc::new(MemoryTokenAuditStore::new()),
            keys: Arc::new(MemoryKeyStore::new()),
            chat_events: Arc::new(MemoryChatEventDedupStore::new()),
            inbox: Arc::new(MemoryInboxStore::new()),
        }
    }

    /// PostgreSQL 存储
    pub fn postgres(pool: Arc<PgPool>, bcrypt_cost: u32) -> Self {
        Self {
            devices: Arc::new(DeviceManagerDb::new(pool.clone(), bcrypt_cost)),
            token_audit: Arc::new(PgTokenAuditRepository::new(pool.clone())),
            keys: Arc::new(PgJwkKeyRepository::new(pool.clone())),
            chat_events: Arc::new(PgChatEventRepository::new(pool.clone())),
            inbox: Arc::new(PgInboxRepository::new(pool)),
        }
    }
}

/// 认证服务器
pub struct AuthServer {
    config: ServerConfig,
    state: HttpServerState,
    retention: Arc<RetentionScheduler>,
    database: Option<Database>,
}

impl AuthServer {
    /// 按配置的存储后端创建服务器
    pub async fn new(config: ServerConfig) -> Result<Self> {
        info!("🔧 初始化认证服务器组件...");

        match config.storage_backend {
            StorageBackend::Postgres => {
                let database = Database::new(&config.database).await?;
                database.run_migrations().await?;
                let stores = Stores::postgres(
                    Arc::new(database.pool().clone()),
                    config.auth.bcrypt_cost,
                );
                Self::with_stores(config, stores, Some(database)).await
            }
            StorageBackend::Memory => {
                warn!("⚠️ 使用内存存储，重启后设备、审计与收件箱数据全部丢失");
                let stores = Stores::memory(config.auth.bcrypt_cost);
                Self::with_stores(config, stores, None).await
            }
        }
    }

    /// 使用给定存储组装所有组件
    pub async fn with_stores(
        config: ServerConfig,
        stores: Stores,
        database: Option<Database>,
    ) -> Result<Self> {
        let key_manager = Arc::new(KeyManager::new(stores.keys.clone()));
        let signing_key = key_manager.load_or_create().await?;
        let jwt = Arc::new(JwtService::new(signing_key, config.auth.issuer.clone())?);

        let token_audit = Arc::new(TokenAuditLedger::new(stores.token_audit.clone()));
        let access_control = Arc::new(AccessControl::new(config.auth.allow_new_device_login));
        let device_auth = Arc::new(DeviceAuthService::new(
            stores.devices.clone(),
            jwt,
            token_audit.clone(),
            access_control.clone(),
            config.auth.clone(),
        ));

        let connections = Arc::new(ConnectionManager::new());
        let state = HttpServerState {
            device_auth,
            key_manager,
            token_audit: token_audit.clone(),
            access_control,
            admin_sessions: Arc::new(AdminSessionStore::new(config.admin.clone())),
            internal_events: Arc::new(InternalEventVerifier::new(
                config.internal.webhook_secret.clone(),
            )),
            chat_event_dedup: Arc::new(ChatEventDedup::new(stores.chat_events.clone())),
            inbox: Arc::new(InboxService::new(stores.inbox.clone())),
            push: Arc::new(PushService::new(connections)),
            bcrypt_cost: config.auth.bcrypt_cost,
        };

        let retention = Arc::new(RetentionScheduler::new(
            stores.devices,
            token_audit,
            config.retention.device_retention(),
            config.retention.cleanup_interval(),
        ));

        info!("✅ 认证服务器组件初始化完成");
        Ok(Self {
            config,
            state,
            retention,
            database,
        })
    }

    pub fn state(&self) -> HttpServerState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub fn retention(&self) -> &Arc<RetentionScheduler> {
        &self.retention
    }

    /// 运行服务器直到收到 Ctrl+C
    pub async fn run(self) -> Result<()> {
        self.show_config_info();

        // 初始化 Prometheus 指标（供 GET /metrics 暴露）
        if self.config.metrics_enabled {
            if crate::infra::metrics::init().is_err() {
                // 已初始化或重复调用，忽略
            } else {
                info!("📊 Prometheus 指标已启用，GET /metrics 可用");
            }
        }

        let retention_task = self.retention.clone().start();
        let pool_task = self.database.clone().map(start_pool_reporter);

        let http = AuthHttpServer::new(self.state.clone(), self.config.bind_address());
        let result = http
            .start(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("⚠️ 监听关闭信号失败: {}", e);
                    std::future::pending::<()>().await;
                }
                info!("🛑 收到关闭信号，正在停止服务器...");
            })
            .await
            .map_err(|e| ServerError::Internal(format!("HTTP 服务器运行失败: {}", e)));

        retention_task.abort();
        if let Some(task) = pool_task {
            task.abort();
        }
        result
    }

    fn show_config_info(&self) {
        info!("📊 服务器配置信息:");
        info!("  - 监听地址: {}", self.config.bind_address());
        info!("  - 存储后端: {:?}", self.config.storage_backend);
        info!("  - 签发者: {}", self.config.auth.issuer);
        info!(
            "  - Access Token 有效期: 默认 {}秒, 最大 {}秒",
            self.config.auth.default_access_ttl_secs, self.config.auth.max_access_ttl_secs
        );
        info!(
            "  - 设备令牌轮换: {}",
            if self.config.auth.rotate_device_token {
                "启用"
            } else {
                "禁用"
            }
        );
        info!(
            "  - 新设备登录: {}",
            if self.config.auth.allow_new_device_login {
                "允许"
            } else {
                "关闭"
            }
        );
        info!(
            "  - 已吊销设备保留: {}天, 清理间隔: {}秒",
            self.config.retention.device_retention_days,
            self.config.retention.cleanup_interval_secs
        );
        if self.config.auth.master_password_bcrypt.is_none() {
            warn!("⚠️ 未配置主密码哈希，App 登录将全部失败");
        }
        if self.config.admin.password_bcrypt.is_none() {
            warn!("⚠️ 未配置管理员密码哈希，管理后台无法登录");
        }
        if self.config.internal.webhook_secret.is_none() {
            warn!("⚠️ 未配置内部事件密钥，聊天事件回调将全部拒绝");
        }
    }
}

/// 定期上报数据库连接池状态
fn start_pool_reporter(database: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(POOL_METRICS_INTERVAL);
        loop {
            interval.tick().await;
            let pool = database.pool();
            crate::infra::metrics::record_db_pool(pool.size(), pool.num_idle());
        }
    })
}
