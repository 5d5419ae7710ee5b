use chrono::Utc;
use moka::future::Cache;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::models::AdminSession;
use crate::auth::password::verify_password;
use crate::config::AdminConfig;

/// 会话 Cookie 名称
pub const ADMIN_SESSION_COOKIE: &str = "ADMIN_SESSION";
/// 会话空闲过期时间（8 小时）
pub const ADMIN_SESSION_IDLE: Duration = Duration::from_secs(8 * 3600);
/// 最大会话数
pub const ADMIN_SESSION_CAPACITY: u64 = 10_000;

/// 管理后台会话存储
///
/// 只保存在进程内存中，重启后所有会话失效
pub struct AdminSessionStore {
    sessions: Cache<String, AdminSession>,
    config: AdminConfig,
}

impl AdminSessionStore {
    pub fn new(config: AdminConfig) -> Self {
        let sessions = Cache::builder()
            .max_capacity(ADMIN_SESSION_CAPACITY)
            .time_to_idle(ADMIN_SESSION_IDLE)
            .build();
        Self { sessions, config }
    }

    /// 管理员登录，用户名或密码不匹配时返回 None
    pub async fn login(&self, username: &str, password: &str) -> Option<AdminSession> {
        if username.trim().is_empty() || password.is_empty() {
            return None;
        }
        if username.trim() != self.config.username {
            return None;
        }
        let hash = self
            .config
            .password_bcrypt
            .as_deref()
            .filter(|h| !h.trim().is_empty())?;
        if !verify_password(password, hash) {
            return None;
        }

        let session = AdminSession {
            session_id: Uuid::new_v4().to_string(),
            username: self.config.username.clone(),
            issued_at: Utc::now(),
        };
        self.sessions
            .insert(session.session_id.clone(), session.clone())
            .await;
        info!("🔐 管理员登录: username={}", session.username);
        Some(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<AdminSession> {
        if session_id.trim().is_empty() {
            return None;
        }
        self.sessions.get(session_id).await
    }

    pub async fn logout(&self, session_id: &str) {
        if session_id.trim().is_empty() {
            return;
        }
        self.sessions.invalidate(session_id).await;
        debug!("管理员会话已注销");
    }
}
