use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 访问令牌 scope 声明的固定值
pub const APP_SCOPE: &str = "app";

/// App Access Token Claims
///
/// 字段全部可选，缺失与否在验证阶段逐一判断，而不是在反序列化阶段报错
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// JWT 标准字段 - 签发者
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// JWT 标准字段 - 主题（App 用户名）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// JWT 标准字段 - 签发时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// JWT 标准字段 - 过期时间 (Unix timestamp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// 自定义字段 - 固定为 "app"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// 自定义字段 - 设备ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// 已认证的 App 主体，在 HTTP 边界解析一次后显式传递
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPrincipal {
    pub username: String,
    pub device_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

/// 签发结果
#[derive(Debug, Clone)]
pub struct IssuedAccessToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// 设备状态（单调：ACTIVE → REVOKED）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Active,
    Revoked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "ACTIVE",
            DeviceStatus::Revoked => "REVOKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(DeviceStatus::Active),
            "REVOKED" => Some(DeviceStatus::Revoked),
            _ => None,
        }
    }
}

/// 设备记录
#[derive(Debug, Clone)]
pub struct Device {
    pub id: Uuid,
    pub name: String,
    /// 当前设备令牌的 bcrypt 哈希，不对外输出
    pub token_hash: String,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    pub fn is_active(&self) -> bool {
        self.status == DeviceStatus::Active
    }
}

/// 登录结果
///
/// `device_token` 是明文设备令牌，只在这里返回一次
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub username: String,
    pub device: Device,
    pub device_token: String,
    pub access_token: IssuedAccessToken,
}

/// 刷新结果，`device_token` 仅在轮换时存在
#[derive(Debug, Clone)]
pub struct RefreshResult {
    pub username: String,
    pub device: Device,
    pub device_token: Option<String>,
    pub access_token: IssuedAccessToken,
}

/// 管理后台会话
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub session_id: String,
    pub username: String,
    pub issued_at: DateTime<Utc>,
}
