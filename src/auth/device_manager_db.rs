// =====================================================
// 设备管理服务（数据库版本）
// =====================================================

use crate::auth::device_manager::{normalize_device_name, retention_cutoff, DeviceStore};
use crate::auth::models::{Device, DeviceStatus};
use crate::auth::password::{hash_password_with_cost, verify_password};
use crate::error::{Result, ServerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const DEVICE_COLUMNS: &str =
    "id, name, token_bcrypt, status, last_seen_at, revoked_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    id: Uuid,
    name: String,
    token_bcrypt: String,
    status: String,
    last_seen_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = ServerError;

    fn try_from(row: DeviceRow) -> Result<Self> {
        let status = DeviceStatus::parse(&row.status)
            .ok_or_else(|| ServerError::Database(format!("未知的设备状态: {}", row.status)))?;
        Ok(Device {
            id: row.id,
            name: row.name,
            token_hash: row.token_bcrypt,
            status,
            last_seen_at: row.last_seen_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 设备管理服务（数据库版本）
pub struct DeviceManagerDb {
    db_pool: Arc<PgPool>,
    bcrypt_cost: u32,
}

impl DeviceManagerDb {
    /// 创建新的设备管理器
    pub fn new(db_pool: Arc<PgPool>, bcrypt_cost: u32) -> Self {
        Self {
            db_pool,
            bcrypt_cost,
        }
    }

    async fn fetch_devices(&self, sql: &str) -> Result<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(sql)
            .fetch_all(&*self.db_pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询设备失败: {}", e)))?;
        rows.into_iter().map(Device::try_from).collect()
    }
}

#[async_trait]
impl DeviceStore for DeviceManagerDb {
    async fn create(&self, name: Option<&str>, raw_token: &str) -> Result<Device> {
        let now = Utc::now();
        let token_hash = hash_password_with_cost(raw_token, self.bcrypt_cost)?;
        let sql = format!(
            "INSERT INTO app_devices ({DEVICE_COLUMNS}) \
             VALUES ($1, $2, $3, 'ACTIVE', $4, NULL, $4, $4) \
             RETURNING {DEVICE_COLUMNS}"
        );

        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(normalize_device_name(name))
            .bind(token_hash)
            .bind(now)
            .fetch_one(&*self.db_pool)
            .await
            .map_err(|e| ServerError::Database(format!("创建设备失败: {}", e)))?;

        let device = Device::try_from(row)?;
        info!("✅ 设备注册成功: device_id={}, name={}", device.id, device.name);
        Ok(device)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM app_devices WHERE id = $1");
        let row = sqlx::query_as::<_, DeviceRow>(&sql)
            .bind(id)
            .fetch_optional(&*self.db_pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询设备失败: {}", e)))?;
        row.map(Device::try_from).transpose()
    }

    async fn find_active_by_token(&self, raw_token: &str) -> Result<Option<Device>> {
        if raw_token.trim().is_empty() {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {DEVICE_COLUMNS} FROM app_devices WHERE status = 'ACTIVE' ORDER BY updated_at DESC"
        );
        let candidates = self.fetch_devices(&sql).await?;
        Ok(candidates
            .into_iter()
            .find(|d| verify_password(raw_token, &d.token_hash)))
    }

    async fn is_active(&self, id: Uuid) -> Result<bool> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT status = 'ACTIVE' FROM app_devices WHERE id = $1")
                .bind(id)
                .fetch_optional(&*self.db_pool)
                .await
                .map_err(|e| ServerError::Database(format!("查询设备状态失败: {}", e)))?;
        Ok(active.unwrap_or(false))
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM app_devices ORDER BY updated_at DESC");
        self.fetch_devices(&sql).await
    }

    async fn touch(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE app_devices SET last_seen_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&*self.db_pool)
        .await
        .map_err(|e| ServerError::Database(format!("更新设备活跃时间失败: {}", e)))?;
        Ok(())
    }

    async fn rename(&self, id: Uuid, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE app_devices SET name = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(normalize_device_name(Some(name)))
            .bind(Utc::now())
            .execute(&*self.db_pool)
            .await
            .map_err(|e| ServerError::Database(format!("重命名设备失败: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE app_devices SET status = 'REVOKED', revoked_at = $2, updated_at = $2 \
             WHERE id = $1 AND status = 'ACTIVE'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&*self.db_pool)
        .await
        .map_err(|e| ServerError::Database(format!("吊销设备失败: {}", e)))?;

        let changed = result.rows_affected() > 0;
        if changed {
            info!("🚫 设备已吊销: device_id={}", id);
        }
        Ok(changed)
    }

    async fn rotate_token(
        &self,
        id: Uuid,
        expected_hash: &str,
        new_raw_token: &str,
    ) -> Result<bool> {
        let token_hash = hash_password_with_cost(new_raw_token, self.bcrypt_cost)?;
        // 比较旧哈希，保证同一设备令牌只能被轮换一次
        let result = sqlx::query(
            "UPDATE app_devices SET token_bcrypt = $2, last_seen_at = $3, updated_at = $3 \
             WHERE id = $1 AND status = 'ACTIVE' AND token_bcrypt = $4",
        )
        .bind(id)
        .bind(token_hash)
        .bind(Utc::now())
        .bind(expected_hash)
        .execute(&*self.db_pool)
        .await
        .map_err(|e| ServerError::Database(format!("轮换设备令牌失败: {}", e)))?;

        debug!("设备令牌轮换: device_id={}, applied={}", id, result.rows_affected() > 0);
        Ok(result.rows_affected() > 0)
    }

    async fn delete_revoked_older_than(&self, retention: Duration) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM app_devices WHERE status = 'REVOKED' AND revoked_at IS NOT NULL AND revoked_at < $1",
        )
        .bind(retention_cutoff(retention))
        .execute(&*self.db_pool)
        .await
        .map_err(|e| ServerError::Database(format!("清理已吊销设备失败: {}", e)))?;
        Ok(result.rows_affected())
    }
}
