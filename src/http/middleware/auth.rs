//! 认证提取器
//!
//! 在 HTTP 边界解析一次身份，处理函数通过参数显式拿到：
//! - `AppAuth`：`Authorization: Bearer <access token>`，校验签名、有效期与设备状态
//! - `AdminAuth`：`ADMIN_SESSION` Cookie 对应的管理员会话

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use tracing::debug;

use crate::auth::models::{AdminSession, AppPrincipal};
use crate::auth::ADMIN_SESSION_COOKIE;
use crate::error::ServerError;
use crate::http::HttpServerState;

/// 从 Authorization 头取 Bearer token
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// 已认证的 App 调用方
#[derive(Debug, Clone)]
pub struct AppAuth(pub AppPrincipal);

impl FromRequestParts<HttpServerState> for AppAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ServerError::Unauthorized("unauthorized".to_string()))?;

        match state.device_auth.authenticate_access_token(&token).await? {
            Some(principal) => Ok(AppAuth(principal)),
            None => {
                debug!("access token 无效或设备已吊销");
                Err(ServerError::Unauthorized("unauthorized".to_string()))
            }
        }
    }
}

/// 已登录的管理员
#[derive(Debug, Clone)]
pub struct AdminAuth(pub AdminSession);

impl FromRequestParts<HttpServerState> for AdminAuth {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &HttpServerState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session_id = jar
            .get(ADMIN_SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or_else(|| ServerError::Unauthorized("admin login required".to_string()))?;

        state
            .admin_sessions
            .get_session(&session_id)
            .await
            .map(AdminAuth)
            .ok_or_else(|| ServerError::Unauthorized("admin login required".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   xyz "));
        assert_eq!(bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
