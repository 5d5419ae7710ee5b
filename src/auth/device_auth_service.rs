//! App 设备认证服务
//!
//! 串联主密码校验、设备存储、access token 签发与令牌审计：
//! 登录创建设备，刷新校验（并可轮换）设备令牌，每次 API 调用校验 access token 并确认设备仍然有效。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::token_audit::TokenAuditLedger;
use crate::auth::access_control::AccessControl;
use crate::auth::device_manager::DeviceStore;
use crate::auth::jwt_service::JwtService;
use crate::auth::models::{
    AppPrincipal, Device, IssuedAccessToken, LoginResult, RefreshResult,
};
use crate::auth::password::verify_password;
use crate::config::AuthConfig;
use crate::error::{Result, ServerError};
use crate::infra::metrics;

/// 设备令牌随机字节数
const DEVICE_TOKEN_BYTES: usize = 32;

/// 生成新的明文设备令牌（32 字节随机数，URL-safe 无填充 base64）
pub fn generate_device_token() -> String {
    let mut bytes = [0u8; DEVICE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 设备认证服务
pub struct DeviceAuthService {
    devices: Arc<dyn DeviceStore>,
    jwt: Arc<JwtService>,
    audit: Arc<TokenAuditLedger>,
    access_control: Arc<AccessControl>,
    config: AuthConfig,
}

impl DeviceAuthService {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        jwt: Arc<JwtService>,
        audit: Arc<TokenAuditLedger>,
        access_control: Arc<AccessControl>,
        config: AuthConfig,
    ) -> Self {
        Self {
            devices,
            jwt,
            audit,
            access_control,
            config,
        }
    }

    pub fn username(&self) -> &str {
        &self.config.app_username
    }

    pub fn access_control(&self) -> &AccessControl {
        &self.access_control
    }

    /// 主密码登录
    ///
    /// 密码错误返回 `Ok(None)` 且没有任何副作用；新设备开关只在密码正确后检查
    pub async fn login(
        &self,
        master_password: &str,
        device_name: Option<&str>,
        access_ttl_secs: Option<i64>,
    ) -> Result<Option<LoginResult>> {
        if !self.verify_master_password(master_password) {
            metrics::record_login("rejected");
            return Ok(None);
        }

        if !self.access_control.is_new_device_login_allowed() {
            warn!("⚠️ 新设备登录已关闭，拒绝登录请求");
            metrics::record_login("forbidden");
            return Err(ServerError::Forbidden(
                "new device onboarding is disabled".to_string(),
            ));
        }

        // 先校验 TTL，避免请求参数错误时留下无用设备
        let ttl = self.resolve_access_ttl(access_ttl_secs)?;

        let device_token = generate_device_token();
        let device = self.devices.create(device_name, &device_token).await?;
        let access_token = self.issue_and_record(&device, ttl).await?;

        info!("🔑 设备登录成功: device_id={}, name={}", device.id, device.name);
        metrics::record_login("success");

        Ok(Some(LoginResult {
            username: self.config.app_username.clone(),
            device,
            device_token,
            access_token,
        }))
    }

    /// 使用设备令牌换取新的 access token
    pub async fn refresh(
        &self,
        raw_device_token: &str,
        access_ttl_secs: Option<i64>,
    ) -> Result<Option<RefreshResult>> {
        let ttl = self.resolve_access_ttl(access_ttl_secs)?;

        let device = match self.devices.find_active_by_token(raw_device_token).await? {
            Some(device) => device,
            None => {
                metrics::record_refresh("rejected");
                return Ok(None);
            }
        };

        let rotated = if self.config.rotate_device_token {
            let next = generate_device_token();
            if !self
                .devices
                .rotate_token(device.id, &device.token_hash, &next)
                .await?
            {
                // 并发吊销或令牌已被其他请求轮换
                metrics::record_refresh("rejected");
                return Ok(None);
            }
            metrics::record_refresh("rotated");
            Some(next)
        } else {
            self.devices.touch(device.id).await?;
            metrics::record_refresh("touched");
            None
        };

        let latest = self.devices.find_by_id(device.id).await?.unwrap_or(device);
        let access_token = self.issue_and_record(&latest, ttl).await?;

        debug!("设备刷新成功: device_id={}, rotated={}", latest.id, rotated.is_some());

        Ok(Some(RefreshResult {
            username: self.config.app_username.clone(),
            device: latest,
            device_token: rotated,
            access_token,
        }))
    }

    /// 解析有效 TTL（秒）
    pub fn resolve_access_ttl(&self, requested: Option<i64>) -> Result<i64> {
        let requested = match requested {
            None => return Ok(self.config.default_access_ttl_secs),
            Some(secs) => secs,
        };
        if requested <= 0 {
            return Err(ServerError::Validation(
                "accessTtlSeconds must be positive".to_string(),
            ));
        }
        let max = self.config.max_access_ttl_secs;
        if max <= 0 {
            return Err(ServerError::Configuration(
                "max-access-ttl must be positive".to_string(),
            ));
        }
        if requested > max {
            return Err(ServerError::Validation(format!(
                "requested access ttl exceeds limit, max seconds={}",
                max
            )));
        }
        Ok(requested)
    }

    /// 校验 access token 并确认设备仍然活跃，成功时更新设备最后活跃时间
    pub async fn authenticate_access_token(&self, token: &str) -> Result<Option<AppPrincipal>> {
        let principal = match self.jwt.verify(token) {
            Some(principal) => principal,
            None => return Ok(None),
        };

        if !self.devices.is_active(principal.device_id).await? {
            debug!("access token 对应设备已失效: device_id={}", principal.device_id);
            return Ok(None);
        }

        self.devices.touch(principal.device_id).await?;
        Ok(Some(principal))
    }

    /// 登出即吊销当前设备
    pub async fn logout(&self, principal: &AppPrincipal) -> Result<()> {
        self.revoke_device(principal.device_id).await?;
        Ok(())
    }

    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        self.devices.list_devices().await
    }

    /// 重命名设备，返回更新后的设备
    pub async fn rename_device(&self, device_id: Uuid, device_name: &str) -> Result<Device> {
        if device_name.trim().is_empty() {
            return Err(ServerError::Validation("deviceName is required".to_string()));
        }
        if !self.devices.rename(device_id, device_name).await? {
            return Err(ServerError::NotFound("device not found".to_string()));
        }
        self.devices
            .find_by_id(device_id)
            .await?
            .ok_or_else(|| ServerError::NotFound("device not found".to_string()))
    }

    /// 吊销设备并标记其审计记录，返回设备状态是否发生变化
    pub async fn revoke_device(&self, device_id: Uuid) -> Result<bool> {
        let changed = self.devices.revoke(device_id).await?;
        self.audit
            .mark_revoked_by_device_id(&device_id.to_string())
            .await?;
        if changed {
            metrics::record_device_revoked();
        }
        Ok(changed)
    }

    fn verify_master_password(&self, master_password: &str) -> bool {
        if master_password.trim().is_empty() {
            return false;
        }
        match self.config.master_password_bcrypt.as_deref() {
            Some(hash) if !hash.trim().is_empty() => verify_password(master_password, hash),
            _ => false,
        }
    }

    async fn issue_and_record(&self, device: &Device, ttl: i64) -> Result<IssuedAccessToken> {
        let username = &self.config.app_username;
        let issued = self.jwt.issue(username, device.id, ttl)?;
        self.audit
            .record_app_access_token(
                &issued.token,
                username,
                &device.id.to_string(),
                &device.name,
                issued.issued_at,
                issued.expires_at,
            )
            .await?;
        Ok(issued)
    }
}
