use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::audit::token_audit::{
    StatusFilter, TokenAuditRecord, TokenAuditStore, TokenQuery, TokenSource, TokenStatus,
};
use crate::error::{Result, ServerError};

const AUDIT_COLUMNS: &str = "token_sha256, source, token_value, username, device_id, device_name, \
     client_id, authorization_id, issued_at, expires_at, revoked_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct TokenAuditRow {
    token_sha256: String,
    source: String,
    token_value: String,
    username: Option<String>,
    device_id: Option<String>,
    device_name: Option<String>,
    client_id: Option<String>,
    authorization_id: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TokenAuditRow> for TokenAuditRecord {
    type Error = ServerError;

    fn try_from(row: TokenAuditRow) -> Result<Self> {
        let source = TokenSource::parse(&row.source)
            .ok_or_else(|| ServerError::Database(format!("未知的令牌来源: {}", row.source)))?;
        Ok(TokenAuditRecord {
            token_sha256: row.token_sha256,
            source,
            token_value: row.token_value,
            username: row.username,
            device_id: row.device_id,
            device_name: row.device_name,
            client_id: row.client_id,
            authorization_id: row.authorization_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// 令牌审计仓库（PostgreSQL）
pub struct PgTokenAuditRepository {
    pool: Arc<PgPool>,
}

impl PgTokenAuditRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn status_param(filter: StatusFilter) -> &'static str {
    match filter {
        StatusFilter::All => "ALL",
        StatusFilter::Only(TokenStatus::Active) => "ACTIVE",
        StatusFilter::Only(TokenStatus::Expired) => "EXPIRED",
        StatusFilter::Only(TokenStatus::Revoked) => "REVOKED",
    }
}

#[async_trait]
impl TokenAuditStore for PgTokenAuditRepository {
    async fn delete_issued_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM token_audit WHERE issued_at < $1")
            .bind(cutoff)
            .execute(&*self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("清理令牌审计失败: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn upsert(&self, record: TokenAuditRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO token_audit ({AUDIT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NULL, $11, $11) \
             ON CONFLICT (token_sha256) DO UPDATE SET \
                source = EXCLUDED.source, \
                token_value = EXCLUDED.token_value, \
                username = EXCLUDED.username, \
                device_id = EXCLUDED.device_id, \
                device_name = EXCLUDED.device_name, \
                client_id = EXCLUDED.client_id, \
                authorization_id = EXCLUDED.authorization_id, \
                issued_at = EXCLUDED.issued_at, \
                expires_at = EXCLUDED.expires_at, \
                updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&sql)
            .bind(&record.token_sha256)
            .bind(record.source.as_str())
            .bind(&record.token_value)
            .bind(&record.username)
            .bind(&record.device_id)
            .bind(&record.device_name)
            .bind(&record.client_id)
            .bind(&record.authorization_id)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .bind(record.updated_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("写入令牌审计失败: {}", e)))?;
        Ok(())
    }

    async fn mark_revoked_by_device_id(&self, device_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE token_audit SET revoked_at = COALESCE(revoked_at, $2), updated_at = $2 \
             WHERE device_id = $1 AND revoked_at IS NULL",
        )
        .bind(device_id)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("标记令牌吊销失败: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn mark_revoked_by_authorization_id(
        &self,
        authorization_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE token_audit SET revoked_at = COALESCE(revoked_at, $2), updated_at = $2 \
             WHERE authorization_id = $1 AND revoked_at IS NULL",
        )
        .bind(authorization_id)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("标记令牌吊销失败: {}", e)))?;
        Ok(result.rows_affected())
    }

    async fn list(&self, query: &TokenQuery) -> Result<Vec<TokenAuditRecord>> {
        let sources: Vec<String> = query
            .sources
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let sql = format!(
            "SELECT {AUDIT_COLUMNS} FROM token_audit \
             WHERE source = ANY($1) AND ( \
                $2 = 'ALL' \
                OR ($2 = 'REVOKED' AND revoked_at IS NOT NULL) \
                OR ($2 = 'EXPIRED' AND revoked_at IS NULL AND expires_at IS NOT NULL AND expires_at <= $3) \
                OR ($2 = 'ACTIVE' AND revoked_at IS NULL AND (expires_at IS NULL OR expires_at > $3)) \
             ) \
             ORDER BY issued_at DESC, created_at DESC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, TokenAuditRow>(&sql)
            .bind(&sources)
            .bind(status_param(query.status))
            .bind(query.now)
            .bind(query.limit)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| ServerError::Database(format!("查询令牌审计失败: {}", e)))?;
        rows.into_iter().map(TokenAuditRecord::try_from).collect()
    }
}
