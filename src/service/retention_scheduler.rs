use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::audit::token_audit::{TokenAuditLedger, TOKEN_AUDIT_RETENTION};
use crate::auth::device_manager::DeviceStore;

/// 单次清理结果，失败的一项记为 None
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub devices_deleted: Option<u64>,
    pub audit_rows_deleted: Option<u64>,
}

/// 定期清理已吊销设备与过期审计记录
pub struct RetentionScheduler {
    devices: Arc<dyn DeviceStore>,
    audit: Arc<TokenAuditLedger>,
    device_retention: Duration,
    interval: Duration,
}

impl RetentionScheduler {
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        audit: Arc<TokenAuditLedger>,
        device_retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            devices,
            audit,
            device_retention,
            interval,
        }
    }

    /// 执行一次清理，两项互不影响
    pub async fn run_once(&self) -> RetentionReport {
        let devices_deleted = match self
            .devices
            .delete_revoked_older_than(self.device_retention)
            .await
        {
            Ok(count) => {
                crate::infra::metrics::record_devices_swept(count);
                Some(count)
            }
            Err(e) => {
                error!("❌ 清理已吊销设备失败: {}", e);
                None
            }
        };

        let audit_rows_deleted = match self
            .audit
            .delete_issued_older_than(TOKEN_AUDIT_RETENTION)
            .await
        {
            Ok(count) => {
                crate::infra::metrics::record_audit_rows_swept(count);
                Some(count)
            }
            Err(e) => {
                error!("❌ 清理令牌审计失败: {}", e);
                None
            }
        };

        let report = RetentionReport {
            devices_deleted,
            audit_rows_deleted,
        };
        if report.devices_deleted.unwrap_or(0) > 0 || report.audit_rows_deleted.unwrap_or(0) > 0 {
            info!(
                "🧹 定期清理: 设备 {} 个, 审计记录 {} 条",
                report.devices_deleted.unwrap_or(0),
                report.audit_rows_deleted.unwrap_or(0)
            );
        }
        report
    }

    /// 启动定期清理任务
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!("⏰ 启动数据清理任务，间隔 {:?}", self.interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成，跳过它，启动时不做清理
            interval.tick().await;
            loop {
                interval.tick().await;
                self.run_once().await;
            }
        })
    }
}
