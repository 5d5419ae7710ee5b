//! Prometheus 指标：登录/刷新次数、推送连接数、广播投递结果、审计清理量等
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。
//! 未初始化时各 `record_*` 调用是空操作。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_LOGIN_TOTAL: &str = "app_auth_login_total";
const COUNTER_REFRESH_TOTAL: &str = "app_auth_refresh_total";
const COUNTER_DEVICE_REVOKED: &str = "app_auth_device_revoked_total";
const GAUGE_PUSH_CONNECTIONS: &str = "app_auth_push_connections_current";
const COUNTER_BROADCAST_DELIVERED: &str = "app_auth_broadcast_delivered_total";
const COUNTER_BROADCAST_FAILED: &str = "app_auth_broadcast_failed_total";
const COUNTER_AUDIT_SWEPT: &str = "app_auth_token_audit_swept_total";
const COUNTER_DEVICES_SWEPT: &str = "app_auth_devices_swept_total";
const COUNTER_INTERNAL_EVENTS: &str = "app_auth_internal_events_total";
const GAUGE_DB_POOL_SIZE: &str = "app_auth_db_pool_size";
const GAUGE_DB_POOL_IDLE: &str = "app_auth_db_pool_idle";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于 HTTP 暴露）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 是否已初始化（可供 /metrics 使用）
pub fn is_initialized() -> bool {
    HANDLE.get().is_some()
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 登录结果：outcome 取值 success / rejected / forbidden
pub fn record_login(outcome: &'static str) {
    metrics::counter!(COUNTER_LOGIN_TOTAL, "outcome" => outcome).increment(1);
}

/// 刷新结果：outcome 取值 rotated / touched / rejected
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!(COUNTER_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_device_revoked() {
    metrics::counter!(COUNTER_DEVICE_REVOKED).increment(1);
}

/// 更新当前推送连接数（Gauge）。在连接注册/注销后调用。
pub fn record_push_connections(count: usize) {
    metrics::gauge!(GAUGE_PUSH_CONNECTIONS).set(count as f64);
}

/// 记录一次广播的投递结果
pub fn record_broadcast(event_type: &str, delivered: usize, failed: usize) {
    metrics::counter!(COUNTER_BROADCAST_DELIVERED, "type" => event_type.to_string())
        .increment(delivered as u64);
    if failed > 0 {
        metrics::counter!(COUNTER_BROADCAST_FAILED, "type" => event_type.to_string())
            .increment(failed as u64);
    }
}

pub fn record_audit_rows_swept(count: u64) {
    metrics::counter!(COUNTER_AUDIT_SWEPT).increment(count);
}

pub fn record_devices_swept(count: u64) {
    metrics::counter!(COUNTER_DEVICES_SWEPT).increment(count);
}

/// 内部事件：outcome 取值 accepted / duplicate / rejected
pub fn record_internal_event(outcome: &'static str) {
    metrics::counter!(COUNTER_INTERNAL_EVENTS, "outcome" => outcome).increment(1);
}

/// 更新数据库连接池状态（Gauge）。
pub fn record_db_pool(size: u32, idle: usize) {
    metrics::gauge!(GAUGE_DB_POOL_SIZE).set(size as f64);
    metrics::gauge!(GAUGE_DB_POOL_IDLE).set(idle as f64);
}
