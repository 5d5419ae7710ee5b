//! 管理后台会话 API
//!
//! 会话 id 放在 `ADMIN_SESSION` Cookie 中（HttpOnly, SameSite=Lax, 8 小时）

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::auth::admin_session::{ADMIN_SESSION_COOKIE, ADMIN_SESSION_IDLE};
use crate::error::{Result, ServerError};
use crate::http::middleware::AdminAuth;
use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/admin/api/session/login", post(login))
        .route("/admin/api/session/logout", post(logout))
        .route("/admin/api/session/me", get(me))
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn session_cookie(value: String, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((ADMIN_SESSION_COOKIE, value))
        .http_only(true)
        .path("/")
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

async fn login(
    State(state): State<HttpServerState>,
    jar: CookieJar,
    Json(req): Json<AdminLoginRequest>,
) -> Result<(CookieJar, Json<Value>)> {
    let session = match state
        .admin_sessions
        .login(&req.username, &req.password)
        .await
    {
        Some(session) => session,
        None => {
            warn!("⚠️ 管理员登录失败");
            return Err(ServerError::Unauthorized("invalid credentials".to_string()));
        }
    };

    let max_age = time::Duration::seconds(ADMIN_SESSION_IDLE.as_secs() as i64);
    let jar = jar.add(session_cookie(session.session_id, max_age));
    Ok((jar, Json(json!({ "username": session.username }))))
}

async fn logout(State(state): State<HttpServerState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(cookie) = jar.get(ADMIN_SESSION_COOKIE) {
        state.admin_sessions.logout(cookie.value()).await;
    }
    let jar = jar.add(session_cookie(String::new(), time::Duration::ZERO));
    (jar, StatusCode::NO_CONTENT)
}

async fn me(AdminAuth(session): AdminAuth) -> Json<Value> {
    Json(json!({
        "username": session.username,
        "issuedAt": session.issued_at,
    }))
}
