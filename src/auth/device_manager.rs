use crate::auth::models::{Device, DeviceStatus};
use crate::auth::password::{hash_password_with_cost, verify_password};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// 设备名称最大长度（字符）
pub const MAX_DEVICE_NAME_LEN: usize = 64;
/// 空名称时的占位名
pub const DEFAULT_DEVICE_NAME: &str = "Unknown Device";

/// 规范化设备名称：去空白、空值给默认名、截断到 64 个字符
pub fn normalize_device_name(name: Option<&str>) -> String {
    let trimmed = name.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return DEFAULT_DEVICE_NAME.to_string();
    }
    trimmed.chars().take(MAX_DEVICE_NAME_LEN).collect()
}

/// 保留期截止时间
pub fn retention_cutoff(retention: Duration) -> DateTime<Utc> {
    let retention = chrono::Duration::from_std(retention)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    Utc::now() - retention
}

/// 设备存储接口
///
/// 每个操作内部只取一次 `now`，所有时间戳字段使用同一值
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 创建设备（保存设备令牌哈希，状态 ACTIVE）
    async fn create(&self, name: Option<&str>, raw_token: &str) -> Result<Device>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>>;

    /// 按设备令牌查找活跃设备
    ///
    /// 按 updated_at 倒序逐个比对 bcrypt 哈希，代价与活跃设备数成正比
    async fn find_active_by_token(&self, raw_token: &str) -> Result<Option<Device>>;

    async fn is_active(&self, id: Uuid) -> Result<bool>;

    /// 全部设备，按 updated_at 倒序
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// 更新最后活跃时间（仅 ACTIVE）
    async fn touch(&self, id: Uuid) -> Result<()>;

    /// 重命名（不区分状态），返回是否命中
    async fn rename(&self, id: Uuid, name: &str) -> Result<bool>;

    /// 吊销（仅 ACTIVE → REVOKED），返回是否发生状态变化
    async fn revoke(&self, id: Uuid) -> Result<bool>;

    /// 轮换设备令牌（仅 ACTIVE 且当前哈希仍为 `expected_hash`），返回是否成功
    async fn rotate_token(&self, id: Uuid, expected_hash: &str, new_raw_token: &str)
        -> Result<bool>;

    /// 删除 revoked_at 早于保留期的已吊销设备，返回删除条数
    async fn delete_revoked_older_than(&self, retention: Duration) -> Result<u64>;
}

/// 设备管理服务（内存版本）
pub struct DeviceManager {
    devices: DashMap<Uuid, Device>,
    bcrypt_cost: u32,
}

impl DeviceManager {
    /// 创建新的设备管理器
    pub fn new(bcrypt_cost: u32) -> Self {
        Self {
            devices: DashMap::new(),
            bcrypt_cost,
        }
    }

    fn sorted_by_update_desc(&self, only_active: bool) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| !only_active || entry.is_active())
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        devices
    }
}

#[async_trait]
impl DeviceStore for DeviceManager {
    async fn create(&self, name: Option<&str>, raw_token: &str) -> Result<Device> {
        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4(),
            name: normalize_device_name(name),
            token_hash: hash_password_with_cost(raw_token, self.bcrypt_cost)?,
            status: DeviceStatus::Active,
            last_seen_at: Some(now),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        };
        self.devices.insert(device.id, device.clone());
        info!("✅ 设备注册成功: device_id={}, name={}", device.id, device.name);
        Ok(device)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>> {
        Ok(self.devices.get(&id).map(|d| d.clone()))
    }

    async fn find_active_by_token(&self, raw_token: &str) -> Result<Option<Device>> {
        if raw_token.trim().is_empty() {
            return Ok(None);
        }
        Ok(self
            .sorted_by_update_desc(true)
            .into_iter()
            .find(|d| verify_password(raw_token, &d.token_hash)))
    }

    async fn is_active(&self, id: Uuid) -> Result<bool> {
        Ok(self.devices.get(&id).map(|d| d.is_active()).unwrap_or(false))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        Ok(self.sorted_by_update_desc(false))
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        if let Some(mut device) = self.devices.get_mut(&id) {
            if device.is_active() {
                device.last_seen_at = Some(now);
                device.updated_at = now;
            }
        }
        Ok(())
    }

    async fn rename(&self, id: Uuid, name: &str) -> Result<bool> {
        let now = Utc::now();
        match self.devices.get_mut(&id) {
            Some(mut device) => {
                device.name = normalize_device_name(Some(name));
                device.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke(&self, id: Uuid) -> Result<bool> {
        let now = Utc::now();
        match self.devices.get_mut(&id) {
            Some(mut device) if device.is_active() => {
                device.status = DeviceStatus::Revoked;
                device.revoked_at = Some(now);
                device.updated_at = now;
                info!("🚫 设备已吊销: device_id={}", id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn rotate_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_raw_token: &str,
    ) -> Result<bool> {
        // 先在锁外计算哈希，避免持有分片锁做 bcrypt
        let token_hash = hash_password_with_cost(new_raw_token, self.bcrypt_cost)?;
        let now = Utc::now();
        match self.devices.get_mut(&id) {
            Some(mut device) if device.is_active() && device.token_hash == expected_hash => {
                device.token_hash = token_hash;
                device.last_seen_at = Some(now);
                device.updated_at = now;
                debug!("设备令牌已轮换: device_id={}", id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_revoked_older_than(&self, retention: Duration) -> Result<u64> {
        let cutoff = retention_cutoff(retention);
        let before = self.devices.len();
        self.devices.retain(|_, device| {
            !(device.status == DeviceStatus::Revoked
                && device.revoked_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok(before.saturating_sub(self.devices.len()) as u64)
    }
}
