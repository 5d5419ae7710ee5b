//! HTTP 服务器模块 - 使用 Axum 提供认证与推送 API
//!
//! 功能包括：
//! - App 主密码登录、设备令牌刷新与设备管理
//! - App 收件箱与 WebSocket 实时推送
//! - 内部事件回调（HMAC 签名）
//! - 管理后台会话、安全与收件箱接口

pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{build_router, AuthHttpServer, HttpServerState};
