//! App 认证 API
//!
//! - `POST /api/auth/login` 主密码登录，创建设备并签发 access token
//! - `POST /api/auth/refresh` 设备令牌换取新的 access token
//! - `POST /api/auth/logout` 吊销当前设备
//! - `GET  /api/auth/me` 当前主体
//! - `GET|PATCH|DELETE /api/auth/devices[/{id}]` 设备管理
//! - `GET  /api/auth/jwks`、`/.well-known/jwks.json` 公钥
//! - `GET  /api/auth/new-device-access` 新设备登录开关

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::auth::models::{Device, IssuedAccessToken};
use crate::error::{Result, ServerError};
use crate::http::middleware::AppAuth;
use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/auth/devices", get(list_devices))
        .route("/api/auth/devices/{device_id}", patch(rename_device).delete(delete_device))
        .route("/api/auth/jwks", get(jwks))
        .route("/.well-known/jwks.json", get(jwks))
        .route("/api/auth/new-device-access", get(new_device_access))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub master_password: String,
    pub device_name: Option<String>,
    pub access_ttl_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub device_token: String,
    pub access_ttl_seconds: Option<i64>,
}

/// 登录/刷新响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenResponse {
    pub username: String,
    pub device_id: Uuid,
    pub device_name: String,
    pub access_token: String,
    pub access_token_expire_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
}

impl AuthTokenResponse {
    fn new(
        username: String,
        device: &Device,
        access_token: IssuedAccessToken,
        device_token: Option<String>,
    ) -> Self {
        Self {
            username,
            device_id: device.id,
            device_name: device.name.clone(),
            access_token: access_token.token,
            access_token_expire_at: access_token.expires_at,
            device_token,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResponse {
    pub device_id: Uuid,
    pub device_name: String,
    pub status: &'static str,
    pub current: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceResponse {
    pub fn from_device(device: &Device, current_device_id: Option<Uuid>) -> Self {
        Self {
            device_id: device.id,
            device_name: device.name.clone(),
            status: device.status.as_str(),
            current: current_device_id == Some(device.id),
            last_seen_at: device.last_seen_at,
            revoked_at: device.revoked_at,
            created_at: device.created_at,
            updated_at: device.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameDeviceRequest {
    #[serde(default)]
    pub device_name: String,
}

/// 主密码登录（管理后台签发接口共用）
pub async fn issue_login(state: &HttpServerState, req: LoginRequest) -> Result<AuthTokenResponse> {
    let result = state
        .device_auth
        .login(
            &req.master_password,
            req.device_name.as_deref(),
            req.access_ttl_seconds,
        )
        .await?
        .ok_or_else(|| ServerError::BadRequest("invalid credentials".to_string()))?;

    Ok(AuthTokenResponse::new(
        result.username,
        &result.device,
        result.access_token,
        Some(result.device_token),
    ))
}

/// 设备令牌刷新（管理后台签发接口共用）
pub async fn issue_refresh(
    state: &HttpServerState,
    req: RefreshRequest,
) -> Result<AuthTokenResponse> {
    let result = state
        .device_auth
        .refresh(&req.device_token, req.access_ttl_seconds)
        .await?
        .ok_or_else(|| ServerError::BadRequest("invalid device token".to_string()))?;

    Ok(AuthTokenResponse::new(
        result.username,
        &result.device,
        result.access_token,
        result.device_token,
    ))
}

async fn login(
    State(state): State<HttpServerState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>> {
    issue_login(&state, req).await.map(Json)
}

async fn refresh(
    State(state): State<HttpServerState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>> {
    issue_refresh(&state, req).await.map(Json)
}

async fn logout(
    State(state): State<HttpServerState>,
    AppAuth(principal): AppAuth,
) -> Result<StatusCode> {
    state.device_auth.logout(&principal).await?;
    info!("👋 设备登出: device_id={}", principal.device_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn me(AppAuth(principal): AppAuth) -> Json<Value> {
    Json(json!({
        "username": principal.username,
        "deviceId": principal.device_id,
        "issuedAt": principal.issued_at,
    }))
}

async fn list_devices(
    State(state): State<HttpServerState>,
    AppAuth(principal): AppAuth,
) -> Result<Json<Vec<DeviceResponse>>> {
    let devices = state.device_auth.list_devices().await?;
    Ok(Json(
        devices
            .iter()
            .map(|d| DeviceResponse::from_device(d, Some(principal.device_id)))
            .collect(),
    ))
}

async fn rename_device(
    State(state): State<HttpServerState>,
    AppAuth(principal): AppAuth,
    Path(device_id): Path<Uuid>,
    Json(req): Json<RenameDeviceRequest>,
) -> Result<Json<DeviceResponse>> {
    let device = state
        .device_auth
        .rename_device(device_id, &req.device_name)
        .await?;
    Ok(Json(DeviceResponse::from_device(
        &device,
        Some(principal.device_id),
    )))
}

async fn delete_device(
    State(state): State<HttpServerState>,
    AppAuth(_principal): AppAuth,
    Path(device_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.device_auth.revoke_device(device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn jwks(State(state): State<HttpServerState>) -> Result<Json<Value>> {
    Ok(Json(state.key_manager.public_jwks().await?))
}

async fn new_device_access(State(state): State<HttpServerState>) -> Json<Value> {
    Json(json!({
        "allowNewDeviceLogin": state.access_control.is_new_device_login_allowed(),
    }))
}
