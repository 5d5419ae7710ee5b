//! App 收件箱与内部事件 API
//!
//! - `GET  /api/app/inbox` 消息列表（默认 50 条）
//! - `GET  /api/app/inbox/unread-count`
//! - `POST /api/app/inbox/read`、`/api/app/inbox/read-all` 标记已读并推送 `inbox.sync`
//! - `POST /api/app/internal/chat-events` 聊天服务回调（HMAC 签名），首次事件推送 `chat.new_content`

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::internal_event::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::error::{Result, ServerError};
use crate::http::middleware::AppAuth;
use crate::http::HttpServerState;
use crate::infra::metrics;
use crate::service::inbox_service::InboxMessage;
use crate::service::push_service::events;

/// App 端默认拉取数量
const APP_INBOX_DEFAULT_LIMIT: i64 = 50;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/app/inbox", get(list_inbox))
        .route("/api/app/inbox/unread-count", get(unread_count))
        .route("/api/app/inbox/read", post(mark_read))
        .route("/api/app/inbox/read-all", post(mark_all_read))
        .route("/api/app/internal/chat-events", post(chat_events))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub message_ids: Vec<Uuid>,
}

impl MarkReadRequest {
    pub fn validated_ids(&self) -> Result<&[Uuid]> {
        if self.message_ids.is_empty() {
            return Err(ServerError::Validation("messageIds is required".to_string()));
        }
        Ok(&self.message_ids)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatEventRequest {
    chat_id: String,
    run_id: String,
    updated_at: Option<i64>,
    chat_name: Option<String>,
}

/// 读取未读数并推送 `inbox.sync`
pub async fn push_inbox_sync(state: &HttpServerState) -> Result<i64> {
    let unread = state.inbox.unread_count().await?;
    state
        .push
        .broadcast(events::INBOX_SYNC, json!({ "unreadCount": unread }));
    Ok(unread)
}

async fn list_inbox(
    State(state): State<HttpServerState>,
    AppAuth(_principal): AppAuth,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Vec<InboxMessage>>> {
    let limit = query.limit.unwrap_or(APP_INBOX_DEFAULT_LIMIT);
    let messages = state.inbox.list_messages(query.unread_only, limit).await?;
    Ok(Json(messages))
}

async fn unread_count(
    State(state): State<HttpServerState>,
    AppAuth(_principal): AppAuth,
) -> Result<Json<Value>> {
    let unread = state.inbox.unread_count().await?;
    Ok(Json(json!({ "unreadCount": unread })))
}

async fn mark_read(
    State(state): State<HttpServerState>,
    AppAuth(_principal): AppAuth,
    Json(req): Json<MarkReadRequest>,
) -> Result<StatusCode> {
    state.inbox.mark_read(req.validated_ids()?).await?;
    push_inbox_sync(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<HttpServerState>,
    AppAuth(_principal): AppAuth,
) -> Result<StatusCode> {
    state.inbox.mark_all_read().await?;
    push_inbox_sync(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// 聊天内容更新回调
///
/// 先校验签名再解析 body；同一 (chatId, runId) 只推送一次
async fn chat_events(
    State(state): State<HttpServerState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    if let Err(e) = state.internal_events.verify(
        header_str(&headers, TIMESTAMP_HEADER),
        header_str(&headers, SIGNATURE_HEADER),
        &body,
    ) {
        metrics::record_internal_event("rejected");
        return Err(match e {
            ServerError::Unauthorized(detail) => {
                warn!("⚠️ 内部事件签名校验失败: {}", detail);
                ServerError::Unauthorized("unauthorized".to_string())
            }
            // 未配置密钥等服务端错误原样返回
            other => {
                error!("❌ 内部事件校验异常: {}", other.detail());
                other
            }
        });
    }

    let event: ChatEventRequest = serde_json::from_str(&body)
        .map_err(|_| ServerError::BadRequest("invalid internal payload".to_string()))?;

    let first = state
        .chat_event_dedup
        .mark_if_first(&event.chat_id, &event.run_id)
        .await?;

    if first {
        metrics::record_internal_event("accepted");
        let report = state.push.broadcast(
            events::CHAT_NEW_CONTENT,
            json!({
                "chatId": event.chat_id,
                "runId": event.run_id,
                "updatedAt": event.updated_at.unwrap_or_else(|| Utc::now().timestamp_millis()),
                "chatName": event.chat_name.unwrap_or_default(),
                "refreshHints": {
                    "refreshChats": true,
                    "refreshActiveChat": true,
                },
            }),
        );
        info!(
            "💬 聊天事件已推送: chat_id={}, run_id={}, delivered={}",
            event.chat_id, event.run_id, report.delivered
        );
    } else {
        metrics::record_internal_event("duplicate");
        debug!("重复的聊天事件: chat_id={}, run_id={}", event.chat_id, event.run_id);
    }

    Ok(Json(json!({ "accepted": true, "duplicate": !first })))
}
