//! HTTP 路由模块
//!
//! 路由结构：
//! - `/api/auth/*`  - App 认证（主密码登录、设备令牌刷新、设备管理、JWKS）
//! - `/api/app/*`   - App 业务接口（收件箱、WebSocket 推送、内部事件回调）
//! - `/admin/api/*` - 管理后台（Cookie 会话认证）
//! - `/health`、`/metrics` - 运维端点

pub mod admin_inbox;
pub mod admin_security;
pub mod admin_session;
pub mod app_inbox;
pub mod auth;
pub mod metrics;
pub mod ws;

use axum::{routing::get, Router};
use crate::http::HttpServerState;

/// 创建所有路由
pub fn create_routes() -> Router<HttpServerState> {
    Router::new()
        .route("/health", get(metrics::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .merge(auth::create_route())           // /api/auth/* - App 认证
        .merge(app_inbox::create_route())      // /api/app/inbox/*、/api/app/internal/*
        .merge(ws::create_route())             // /api/app/ws - 实时推送
        .merge(admin_session::create_route())  // /admin/api/session/*
        .merge(admin_security::create_route()) // /admin/api/security/*、/admin/api/bcrypt/*
        .merge(admin_inbox::create_route())    // /admin/api/inbox/*
}
