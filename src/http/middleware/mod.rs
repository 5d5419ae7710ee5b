//! HTTP 中间件与提取器

pub mod auth;

pub use auth::{bearer_token, AdminAuth, AppAuth};
