//! 令牌审计台账
//!
//! 统一记录 App access token 与 OAuth access/refresh token。每个令牌按 SHA-256 只保留一行，
//! 状态（ACTIVE / EXPIRED / REVOKED）在读取时由 expires_at / revoked_at 推导。
//! 每次读写前先删除 issued_at 超过 30 天的记录。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::device_manager::retention_cutoff;
use crate::error::{Result, ServerError};

/// 审计记录保留期
pub const TOKEN_AUDIT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);
/// 单次查询上限
pub const MAX_LIST_LIMIT: i64 = 200;

/// 令牌来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenSource {
    AppAccess,
    OauthAccess,
    OauthRefresh,
}

impl TokenSource {
    pub const ALL: [TokenSource; 3] = [
        TokenSource::AppAccess,
        TokenSource::OauthAccess,
        TokenSource::OauthRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::AppAccess => "APP_ACCESS",
            TokenSource::OauthAccess => "OAUTH_ACCESS",
            TokenSource::OauthRefresh => "OAUTH_REFRESH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "APP_ACCESS" => Some(TokenSource::AppAccess),
            "OAUTH_ACCESS" => Some(TokenSource::OauthAccess),
            "OAUTH_REFRESH" => Some(TokenSource::OauthRefresh),
            _ => None,
        }
    }
}

/// 推导出的令牌状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenStatus {
    Active,
    Expired,
    Revoked,
}

impl TokenStatus {
    /// REVOKED 优先，其次 EXPIRED（expires_at <= now），否则 ACTIVE
    pub fn derive(
        revoked_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        if revoked_at.is_some() {
            TokenStatus::Revoked
        } else if expires_at.map(|at| at <= now).unwrap_or(false) {
            TokenStatus::Expired
        } else {
            TokenStatus::Active
        }
    }
}

/// 查询用的状态过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(TokenStatus),
}

impl StatusFilter {
    /// 空值视为 ALL，未知值为请求错误
    pub fn parse(value: Option<&str>) -> Result<Self> {
        let normalized = value.map(|v| v.trim().to_ascii_uppercase()).unwrap_or_default();
        match normalized.as_str() {
            "" | "ALL" => Ok(StatusFilter::All),
            "ACTIVE" => Ok(StatusFilter::Only(TokenStatus::Active)),
            "EXPIRED" => Ok(StatusFilter::Only(TokenStatus::Expired)),
            "REVOKED" => Ok(StatusFilter::Only(TokenStatus::Revoked)),
            _ => Err(ServerError::Validation(
                "status must be one of: ALL, ACTIVE, EXPIRED, REVOKED".to_string(),
            )),
        }
    }

    pub fn matches(&self, status: TokenStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(expected) => *expected == status,
        }
    }
}

/// 待记录的令牌
#[derive(Debug, Clone)]
pub struct TokenAuditEntry {
    pub source: TokenSource,
    pub token: String,
    pub username: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub client_id: Option<String>,
    pub authorization_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 台账中的一行
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuditRecord {
    pub token_sha256: String,
    pub source: TokenSource,
    pub token_value: String,
    pub username: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub client_id: Option<String>,
    pub authorization_id: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenAuditRecord {
    pub fn status(&self, now: DateTime<Utc>) -> TokenStatus {
        TokenStatus::derive(self.revoked_at, self.expires_at, now)
    }
}

/// 对外展示的行（附带推导状态）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuditView {
    #[serde(flatten)]
    pub record: TokenAuditRecord,
    pub status: TokenStatus,
}

/// 台账查询条件
#[derive(Debug, Clone)]
pub struct TokenQuery {
    pub sources: Vec<TokenSource>,
    pub status: StatusFilter,
    pub limit: i64,
    pub now: DateTime<Utc>,
}

/// 台账存储接口，所有写操作都是单语句
#[async_trait]
pub trait TokenAuditStore: Send + Sync {
    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    /// 按 token_sha256 插入或更新；更新时保留 revoked_at 与 created_at
    async fn upsert(&self, record: TokenAuditRecord) -> Result<()>;

    async fn mark_revoked_by_device_id(&self, device_id: &str, now: DateTime<Utc>) -> Result<u64>;

    async fn mark_revoked_by_authorization_id(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    /// 按 issued_at DESC, created_at DESC 排序
    async fn list(&self, query: &TokenQuery) -> Result<Vec<TokenAuditRecord>>;
}

/// 内存台账存储（开发/测试）
#[derive(Default)]
pub struct MemoryTokenAuditStore {
    rows: DashMap<String, TokenAuditRecord>,
}

impl MemoryTokenAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_revoked_where<F>(&self, now: DateTime<Utc>, predicate: F) -> u64
    where
        F: Fn(&TokenAuditRecord) -> bool,
    {
        let mut changed = 0;
        for mut row in self.rows.iter_mut() {
            if row.revoked_at.is_none() && predicate(&row) {
                row.revoked_at = Some(now);
                row.updated_at = now;
                changed += 1;
            }
        }
        changed
    }
}

#[async_trait]
impl TokenAuditStore for MemoryTokenAuditStore {
    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.rows.len();
        self.rows.retain(|_, row| row.issued_at >= cutoff);
        Ok(before.saturating_sub(self.rows.len()) as u64)
    }

    async fn upsert(&self, record: TokenAuditRecord) -> Result<()> {
        self.rows
            .entry(record.token_sha256.clone())
            .and_modify(|existing| {
                let revoked_at = existing.revoked_at;
                let created_at = existing.created_at;
                *existing = TokenAuditRecord {
                    revoked_at,
                    created_at,
                    ..record.clone()
                };
            })
            .or_insert(record);
        Ok(())
    }

    async fn mark_revoked_by_device_id(&self, device_id: &str, now: DateTime<Utc>) -> Result<u64> {
        Ok(self.mark_revoked_where(now, |row| row.device_id.as_deref() == Some(device_id)))
    }

    async fn mark_revoked_by_authorization_id(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self.mark_revoked_where(now, |row| {
            row.authorization_id.as_deref() == Some(authorization_id)
        }))
    }

    async fn list(&self, query: &TokenQuery) -> Result<Vec<TokenAuditRecord>> {
        let mut rows: Vec<TokenAuditRecord> = self
            .rows
            .iter()
            .filter(|row| query.sources.contains(&row.source))
            .filter(|row| query.status.matches(row.status(query.now)))
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| {
            b.issued_at
                .cmp(&a.issued_at)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }
}

/// 令牌 SHA-256（小写十六进制）
pub fn sha256_hex(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// 解析逗号分隔的来源参数：空值返回默认值，否则逐项 trim + 大写
pub fn parse_sources(csv: Option<&str>, default: &[TokenSource]) -> Vec<String> {
    match csv.map(str::trim) {
        None | Some("") => default.iter().map(|s| s.as_str().to_string()).collect(),
        Some(csv) => csv
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect(),
    }
}

/// 规范化来源集合：忽略未知值并去重，为空时取全部三种
pub fn normalize_sources<S: AsRef<str>>(sources: &[S]) -> Vec<TokenSource> {
    let mut result = Vec::new();
    for source in sources.iter().filter_map(|s| TokenSource::parse(s.as_ref())) {
        if !result.contains(&source) {
            result.push(source);
        }
    }
    if result.is_empty() {
        return TokenSource::ALL.to_vec();
    }
    result
}

/// 查询数量限制在 [1, 200]
pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// 令牌审计台账
pub struct TokenAuditLedger {
    store: Arc<dyn TokenAuditStore>,
}

impl TokenAuditLedger {
    pub fn new(store: Arc<dyn TokenAuditStore>) -> Self {
        Self { store }
    }

    /// 删除超过保留期的记录
    async fn cleanup(&self) -> Result<u64> {
        let deleted = self
            .store
            .delete_issued_before(retention_cutoff(TOKEN_AUDIT_RETENTION))
            .await?;
        if deleted > 0 {
            debug!("🧹 令牌审计清理: 删除 {} 条过期记录", deleted);
            crate::infra::metrics::record_audit_rows_swept(deleted);
        }
        Ok(deleted)
    }

    /// 记录一个令牌，令牌为空或缺少签发时间时直接跳过
    pub async fn record(&self, entry: TokenAuditEntry) -> Result<()> {
        let token = entry.token.trim();
        let issued_at = match entry.issued_at {
            Some(at) if !token.is_empty() => at,
            _ => {
                warn!("⚠️ 跳过审计记录：令牌或签发时间缺失 (source={})", entry.source.as_str());
                return Ok(());
            }
        };

        self.cleanup().await?;

        let now = Utc::now();
        self.store
            .upsert(TokenAuditRecord {
                token_sha256: sha256_hex(token),
                source: entry.source,
                token_value: token.to_string(),
                username: entry.username,
                device_id: entry.device_id,
                device_name: entry.device_name,
                client_id: entry.client_id,
                authorization_id: entry.authorization_id,
                issued_at,
                expires_at: entry.expires_at,
                revoked_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
    }

    pub async fn record_app_access_token(
        &self,
        token: &str,
        username: &str,
        device_id: &str,
        device_name: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        self.record(TokenAuditEntry {
            source: TokenSource::AppAccess,
            token: token.to_string(),
            username: Some(username.to_string()),
            device_id: Some(device_id.to_string()),
            device_name: Some(device_name.to_string()),
            client_id: None,
            authorization_id: None,
            issued_at: Some(issued_at),
            expires_at: Some(expires_at),
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_oauth_token(
        &self,
        source: TokenSource,
        token: &str,
        username: Option<&str>,
        client_id: Option<&str>,
        authorization_id: &str,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.record(TokenAuditEntry {
            source,
            token: token.to_string(),
            username: username.map(str::to_string),
            device_id: None,
            device_name: None,
            client_id: client_id.map(str::to_string),
            authorization_id: Some(authorization_id.to_string()),
            issued_at,
            expires_at,
        })
        .await
    }

    pub async fn record_oauth_access_token(
        &self,
        token: &str,
        username: Option<&str>,
        client_id: Option<&str>,
        authorization_id: &str,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.record_oauth_token(
            TokenSource::OauthAccess,
            token,
            username,
            client_id,
            authorization_id,
            issued_at,
            expires_at,
        )
        .await
    }

    pub async fn record_oauth_refresh_token(
        &self,
        token: &str,
        username: Option<&str>,
        client_id: Option<&str>,
        authorization_id: &str,
        issued_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.record_oauth_token(
            TokenSource::OauthRefresh,
            token,
            username,
            client_id,
            authorization_id,
            issued_at,
            expires_at,
        )
        .await
    }

    /// 设备吊销时标记其名下全部令牌（已吊销的不重写时间）
    pub async fn mark_revoked_by_device_id(&self, device_id: &str) -> Result<u64> {
        if device_id.trim().is_empty() {
            return Ok(0);
        }
        self.cleanup().await?;
        self.store
            .mark_revoked_by_device_id(device_id.trim(), Utc::now())
            .await
    }

    pub async fn mark_revoked_by_authorization_id(&self, authorization_id: &str) -> Result<u64> {
        if authorization_id.trim().is_empty() {
            return Ok(0);
        }
        self.cleanup().await?;
        self.store
            .mark_revoked_by_authorization_id(authorization_id.trim(), Utc::now())
            .await
    }

    /// 查询台账
    pub async fn list_tokens<S: AsRef<str>>(
        &self,
        sources: &[S],
        status: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<TokenAuditView>> {
        let status = StatusFilter::parse(status)?;
        self.cleanup().await?;

        let query = TokenQuery {
            sources: normalize_sources(sources),
            status,
            limit: clamp_limit(limit),
            now: Utc::now(),
        };
        let rows = self.store.list(&query).await?;
        Ok(rows
            .into_iter()
            .map(|record| {
                let status = record.status(query.now);
                TokenAuditView { record, status }
            })
            .collect())
    }

    /// 定时清理入口，与每次读写前的清理调用同一个删除操作
    pub async fn delete_issued_older_than(&self, retention: Duration) -> Result<u64> {
        self.store.delete_issued_before(retention_cutoff(retention)).await
    }
}
