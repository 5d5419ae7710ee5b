//! 管理后台安全 API
//!
//! 设备与令牌管理、签名公钥、新设备登录开关以及几个密钥/哈希生成工具。
//! 全部需要管理员会话。

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::audit::token_audit::{parse_sources, TokenAuditView, TokenSource};
use crate::auth::key_manager::{generate_ephemeral_key_pair, public_key_pem_from_jwk, PemKeyPair};
use crate::auth::password::hash_password_with_cost;
use crate::error::{Result, ServerError};
use crate::http::middleware::AdminAuth;
use crate::http::routes::auth::{
    issue_login, issue_refresh, AuthTokenResponse, DeviceResponse, LoginRequest, RefreshRequest,
};
use crate::http::HttpServerState;

pub fn create_route() -> Router<HttpServerState> {
    Router::new()
        .route("/admin/api/security/app-tokens/issue", post(issue_app_token))
        .route("/admin/api/security/app-tokens/refresh", post(refresh_app_token))
        .route("/admin/api/security/app-devices", get(list_devices))
        .route("/admin/api/security/app-devices/{device_id}/revoke", post(revoke_device))
        .route("/admin/api/security/jwks", get(jwks))
        .route("/admin/api/security/tokens", get(list_tokens))
        .route("/admin/api/security/public-key/generate", post(generate_public_key))
        .route("/admin/api/security/key-pair/generate", post(generate_key_pair))
        .route(
            "/admin/api/security/new-device-access",
            get(get_new_device_access).put(set_new_device_access),
        )
        .route("/admin/api/bcrypt/generate", post(generate_bcrypt))
}

#[derive(Debug, Deserialize)]
pub struct TokenListQuery {
    pub sources: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JwkParams {
    #[serde(default)]
    pub e: String,
    #[serde(default)]
    pub n: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeviceAccessRequest {
    pub allow_new_device_login: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct BcryptRequest {
    #[serde(default)]
    pub password: String,
}

async fn issue_app_token(
    State(state): State<HttpServerState>,
    AdminAuth(session): AdminAuth,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>> {
    let response = issue_login(&state, req).await?;
    info!(
        "🔑 管理员签发 App 令牌: admin={}, device_id={}",
        session.username, response.device_id
    );
    Ok(Json(response))
}

async fn refresh_app_token(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthTokenResponse>> {
    issue_refresh(&state, req).await.map(Json)
}

async fn list_devices(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
) -> Result<Json<Vec<DeviceResponse>>> {
    let devices = state.device_auth.list_devices().await?;
    Ok(Json(
        devices
            .iter()
            .map(|d| DeviceResponse::from_device(d, None))
            .collect(),
    ))
}

async fn revoke_device(
    State(state): State<HttpServerState>,
    AdminAuth(session): AdminAuth,
    Path(device_id): Path<Uuid>,
) -> Result<StatusCode> {
    let changed = state.device_auth.revoke_device(device_id).await?;
    info!(
        "🚫 管理员吊销设备: admin={}, device_id={}, changed={}",
        session.username, device_id, changed
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn jwks(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
) -> Result<Json<Value>> {
    let jwks = state.key_manager.public_jwks().await?;
    Ok(Json(json!({ "jwks": jwks })))
}

async fn list_tokens(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    Query(query): Query<TokenListQuery>,
) -> Result<Json<Vec<TokenAuditView>>> {
    let sources = parse_sources(query.sources.as_deref(), &TokenSource::ALL);
    let tokens = state
        .token_audit
        .list_tokens(&sources, query.status.as_deref(), query.limit)
        .await?;
    Ok(Json(tokens))
}

async fn generate_public_key(
    AdminAuth(_session): AdminAuth,
    Json(params): Json<JwkParams>,
) -> Result<Json<Value>> {
    let pem = public_key_pem_from_jwk(&params.e, &params.n)?;
    Ok(Json(json!({ "publicKeyPem": pem })))
}

async fn generate_key_pair(AdminAuth(_session): AdminAuth) -> Result<Json<PemKeyPair>> {
    Ok(Json(generate_ephemeral_key_pair().await?))
}

async fn get_new_device_access(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
) -> Json<Value> {
    Json(json!({
        "allowNewDeviceLogin": state.access_control.is_new_device_login_allowed(),
    }))
}

async fn set_new_device_access(
    State(state): State<HttpServerState>,
    AdminAuth(session): AdminAuth,
    Json(req): Json<NewDeviceAccessRequest>,
) -> Result<Json<Value>> {
    let allowed = req.allow_new_device_login.ok_or_else(|| {
        ServerError::Validation("allowNewDeviceLogin is required".to_string())
    })?;
    state.access_control.set_new_device_login_allowed(allowed);
    info!(
        "🔐 管理员更新新设备登录开关: admin={}, allowed={}",
        session.username, allowed
    );
    Ok(Json(json!({ "allowNewDeviceLogin": allowed })))
}

async fn generate_bcrypt(
    State(state): State<HttpServerState>,
    AdminAuth(_session): AdminAuth,
    Json(req): Json<BcryptRequest>,
) -> Result<Json<Value>> {
    if req.password.is_empty() {
        return Err(ServerError::Validation("password is required".to_string()));
    }
    let hash = hash_password_with_cost(&req.password, state.bcrypt_cost)?;
    Ok(Json(json!({ "bcrypt": hash })))
}
