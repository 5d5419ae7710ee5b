use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 服务器错误类型
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ServerError {
    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
    /// 认证错误（凭证不匹配、令牌无效）
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// 未授权
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// 验证错误（请求违反策略，例如 TTL 超限）
    #[error("Validation error: {0}")]
    Validation(String),
    /// 错误请求
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 资源未找到
    #[error("Not found: {0}")]
    NotFound(String),
    /// 禁止访问
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// 数据库错误
    #[error("Database error: {0}")]
    Database(String),
    /// 序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// 配置错误（启动或首次使用时即失败）
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// 密钥/签名相关错误
    #[error("Crypto error: {0}")]
    Crypto(String),
}

impl ServerError {
    /// 对外展示的消息（不带分类前缀）
    pub fn detail(&self) -> &str {
        match self {
            ServerError::Internal(msg)
            | ServerError::Authentication(msg)
            | ServerError::Unauthorized(msg)
            | ServerError::Validation(msg)
            | ServerError::BadRequest(msg)
            | ServerError::NotFound(msg)
            | ServerError::Forbidden(msg)
            | ServerError::Database(msg)
            | ServerError::Serialization(msg)
            | ServerError::Configuration(msg)
            | ServerError::Crypto(msg) => msg,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Authentication(_) | ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::Validation(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!("❌ 请求处理失败: {}", self);
        }
        (status_code, Json(ErrorResponse::new(&self))).into_response()
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        ServerError::Database(err.to_string())
    }
}

impl From<rsa::Error> for ServerError {
    fn from(err: rsa::Error) -> Self {
        ServerError::Crypto(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ServerError>;

/// 错误代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 内部错误
    Internal = 1000,
    /// 认证错误
    Authentication = 1001,
    /// 验证错误
    Validation = 1003,
    /// 数据库错误
    Database = 2000,
    /// 序列化错误
    Serialization = 2002,
    /// 配置错误
    Configuration = 2003,
    /// 密钥错误
    Crypto = 2005,
    /// 错误请求
    BadRequest = 5004,
    /// 资源未找到
    NotFound = 5005,
    /// 禁止访问
    Forbidden = 5006,
}

impl From<&ServerError> for ErrorCode {
    fn from(error: &ServerError) -> Self {
        match error {
            ServerError::Internal(_) => ErrorCode::Internal,
            ServerError::Authentication(_) | ServerError::Unauthorized(_) => ErrorCode::Authentication,
            ServerError::Validation(_) => ErrorCode::Validation,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::Forbidden(_) => ErrorCode::Forbidden,
            ServerError::Database(_) => ErrorCode::Database,
            ServerError::Serialization(_) => ErrorCode::Serialization,
            ServerError::Configuration(_) => ErrorCode::Configuration,
            ServerError::Crypto(_) => ErrorCode::Crypto,
        }
    }
}

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误消息
    pub message: String,
    /// 时间戳
    pub timestamp: u64,
}

impl ErrorResponse {
    /// 创建错误响应
    ///
    /// 5xx 错误不回显内部细节
    pub fn new(error: &ServerError) -> Self {
        let message = if error.status_code().is_server_error() {
            "internal server error".to_string()
        } else {
            error.detail().to_string()
        };
        Self {
            code: ErrorCode::from(error),
            message,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }
}
