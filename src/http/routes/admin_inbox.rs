//! 管理后台收件箱 API
//!
//! 发送的消息以 `ADMIN` 身份写入，并立即推送 `inbox.new` 与 `inbox.sync`。

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{Result, ServerError};
use crate::http::middleware::AdminAuth;
use crate::http::routes::app_inbox::{push_inbox_sync, InboxQuery, MarkReadRequest};
use crate::http::HttpServerState;
use crate::service::inbox_service::{InboxMessage, NewInboxMessage};
use crate::service::push_service::events;

/// 管理后台默认拉取数量
const ADMIN_INBOX_DEFAULT_LIMIT: i64 = 100;
/// 管理后台发送者
const ADMIN_SENDER: &str = "ADMIN";

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/admin/api/inbox", get(list_inbox))
        .route("/admin/api/inbox/unread-count", get(unread_count))
        .route("/admin/api/inbox/send", post(send_message))
        .route("/admin/api/inbox/read", post(mark_read))
        .route("/admin/api/inbox/read-all", post(mark_all_read))
        .route("/admin/api/inbox/realtime", post(realtime))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: Option<String>,
    pub payload: Option<Value>,
}

async fn list_inbox(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    Query(query): Query<InboxQuery>,
) -> Result<Json<Vec<InboxMessage>>> {
    let limit = query.limit.unwrap_or(ADMIN_INBOX_DEFAULT_LIMIT);
    let messages = state.inbox.list_messages(query.unread_only, limit).await?;
    Ok(Json(messages))
}

async fn unread_count(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
) -> Result<Json<Value>> {
    let unread = state.inbox.unread_count().await?;
    Ok(Json(json!({ "unreadCount": unread })))
}

async fn send_message(
    State(state): State<HttpServerState>,
    AdminAuth(session): AdminAuth,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<InboxMessage>)> {
    let message = state
        .inbox
        .create_message(NewInboxMessage {
            title: req.title,
            content: req.content,
            message_type: req.message_type,
            payload: req.payload,
            sender: Some(ADMIN_SENDER.to_string()),
        })
        .await?;

    let unread = state.inbox.unread_count().await?;
    state.push.broadcast(
        events::INBOX_NEW,
        json!({ "message": message, "unreadCount": unread }),
    );
    state
        .push
        .broadcast(events::INBOX_SYNC, json!({ "unreadCount": unread }));

    info!(
        "📨 管理员发送收件箱消息: admin={}, message_id={}",
        session.username, message.message_id
    );
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    Json(req): Json<MarkReadRequest>,
) -> Result<StatusCode> {
    state.inbox.mark_read(req.validated_ids()?).await?;
    push_inbox_sync(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
) -> Result<StatusCode> {
    state.inbox.mark_all_read().await?;
    push_inbox_sync(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 转发任意对象为 `realtime.event`，空 body 视为空对象
async fn realtime(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    body: Bytes,
) -> Result<StatusCode> {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value @ Value::Object(_)) => value,
            Ok(Value::Null) => Value::Object(Map::new()),
            _ => {
                return Err(ServerError::BadRequest(
                    "realtime payload must be a JSON object".to_string(),
                ))
            }
        }
    };
    state.push.broadcast(events::REALTIME_EVENT, payload);
    Ok(StatusCode::NO_CONTENT)
}
