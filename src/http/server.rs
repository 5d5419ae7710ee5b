//! HTTP 服务器 - 使用 Axum 提供 App 认证、管理后台与推送接口

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::audit::TokenAuditLedger;
use crate::auth::{
    AccessControl, AdminSessionStore, DeviceAuthService, InternalEventVerifier, KeyManager,
};
use crate::http::routes;
use crate::service::{ChatEventDedup, InboxService, PushService};

/// HTTP 服务器共享状态
#[derive(Clone)]
pub struct HttpServerState {
    pub device_auth: Arc<DeviceAuthService>,
    pub key_manager: Arc<KeyManager>,
    pub token_audit: Arc<TokenAuditLedger>,
    pub access_control: Arc<AccessControl>,
    pub admin_sessions: Arc<AdminSessionStore>,
    pub internal_events: Arc<InternalEventVerifier>,
    pub chat_event_dedup: Arc<ChatEventDedup>,
    pub inbox: Arc<InboxService>,
    pub push: Arc<PushService>,
    /// 管理后台生成 bcrypt 时使用的成本
    pub bcrypt_cost: u32,
}

/// 构建完整路由（测试直接使用）
pub fn build_router(state: HttpServerState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP 服务器
pub struct AuthHttpServer {
    state: HttpServerState,
    bind_address: String,
}

impl AuthHttpServer {
    pub fn new(state: HttpServerState, bind_address: impl Into<String>) -> Self {
        Self {
            state,
            bind_address: bind_address.into(),
        }
    }

    /// 启动 HTTP 服务器，直到收到关闭信号
    pub async fn start(
        &self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = build_router(self.state.clone());

        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!("🌐 HTTP 服务器启动在 {}", self.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("👋 HTTP 服务器已停止");
        Ok(())
    }
}
