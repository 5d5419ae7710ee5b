// 认证模块 - 提供签名密钥、JWT 签发验证、设备管理与管理后台会话

pub mod access_control;
pub mod admin_session;
pub mod device_auth_service;
pub mod device_manager;
pub mod device_manager_db;
pub mod internal_event;
pub mod jwt_service;
pub mod key_manager;
pub mod models;
pub mod password;

// 重新导出主要类型
pub use access_control::AccessControl;
pub use admin_session::{AdminSessionStore, ADMIN_SESSION_COOKIE};
pub use device_auth_service::DeviceAuthService;
pub use device_manager::{DeviceManager, DeviceStore};
pub use device_manager_db::DeviceManagerDb;
pub use internal_event::InternalEventVerifier;
pub use jwt_service::JwtService;
pub use key_manager::{KeyManager, KeyStore, MemoryKeyStore, SigningKey};
pub use models::{
    AdminSession, AppPrincipal, Device, DeviceStatus, IssuedAccessToken, LoginResult,
    RefreshResult,
};
pub use password::{hash_password, verify_password, PASSWORD_COST};
