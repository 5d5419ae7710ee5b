//! App 实时推送 WebSocket
//!
//! `GET /api/app/ws`，access token 来自 `Authorization: Bearer` 或 `access_token` 查询参数
//! （浏览器 WebSocket 无法设置自定义头）。认证失败在升级前返回 401。

use axum::{
    extract::{
        ws::{Message, WebSocket},
        FromRequestParts, Query, State, WebSocketUpgrade,
    },
    http::request::Parts,
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::models::AppPrincipal;
use crate::error::ServerError;
use crate::http::middleware::bearer_token;
use crate::http::HttpServerState;
use crate::infra::connection_manager::{ChannelConnection, OUTBOUND_QUEUE_CAPACITY};
use crate::service::push_service::events;

pub fn create_route() -> Router<HttpServerState> {
    Router::new().route("/api/app/ws", get(ws_handler))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    access_token: Option<String>,
}

/// WebSocket 握手认证，头部优先，其次查询参数
struct WsAuth(AppPrincipal);

impl FromRequestParts<HttpServerState> for WsAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let unauthorized = || ServerError::Unauthorized("unauthorized".to_string());

        let token = match bearer_token(&parts.headers) {
            Some(token) => token,
            None => Query::<WsQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.access_token)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .ok_or_else(unauthorized)?,
        };

        state
            .device_auth
            .authenticate_access_token(&token)
            .await?
            .map(WsAuth)
            .ok_or_else(unauthorized)
    }
}

async fn ws_handler(
    State(state): State<HttpServerState>,
    WsAuth(principal): WsAuth,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state, principal))
}

/// 客户端发送的文本是否为心跳
fn is_ping(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
}

async fn handle_connection(socket: WebSocket, state: HttpServerState, principal: AppPrincipal) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut outbound) = ChannelConnection::new(OUTBOUND_QUEUE_CAPACITY);

    // 写任务：把推送队列写入 socket，socket 写失败即退出
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let connections = state.push.connections().clone();
    connections.register(connection_id, Arc::new(connection), principal.clone());
    info!(
        "🔌 App WebSocket 已连接: connection={}, device={}, 在线 {}",
        connection_id,
        principal.device_id,
        connections.len()
    );

    state.push.broadcast(
        events::SYSTEM_PING,
        json!({ "ts": Utc::now().timestamp_millis() }),
    );

    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) if is_ping(text.as_str()) => {
                state.push.send_to(
                    connection_id,
                    events::SYSTEM_PING,
                    json!({ "ts": Utc::now().timestamp_millis() }),
                );
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    connections.unregister(connection_id);
    writer.abort();
    debug!("App WebSocket 已断开: connection={}", connection_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ping() {
        assert!(is_ping("ping"));
        assert!(is_ping("  PING\n"));
        assert!(!is_ping("pong"));
        assert!(!is_ping(""));
    }
}
