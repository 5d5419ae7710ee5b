use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::key_manager::{KeyStore, StoredKey};
use crate::error::{Result, ServerError};

#[derive(Debug, sqlx::FromRow)]
struct JwkKeyRow {
    kid: String,
    public_key: String,
    private_key: String,
    created_at: DateTime<Utc>,
}

/// 签名密钥仓库（PostgreSQL）
pub struct PgJwkKeyRepository {
    pool: Arc<PgPool>,
}

impl PgJwkKeyRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyStore for PgJwkKeyRepository {
    async fn load_oldest(&self) -> Result<Option<StoredKey>> {
        let row = sqlx::query_as::<_, JwkKeyRow>(
            "SELECT kid, public_key, private_key, created_at FROM jwk_keys \
             ORDER BY created_at ASC, kid ASC LIMIT 1",
        )
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("读取签名密钥失败: {}", e)))?;

        Ok(row.map(|r| StoredKey {
            kid: r.kid,
            public_key: r.public_key,
            private_key: r.private_key,
            created_at: r.created_at,
        }))
    }

    async fn insert(&self, key: &StoredKey) -> Result<()> {
        sqlx::query(
            "INSERT INTO jwk_keys (kid, public_key, private_key, created_at) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (kid) DO NOTHING",
        )
        .bind(&key.kid)
        .bind(&key.public_key)
        .bind(&key.private_key)
        .bind(key.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| ServerError::Database(format!("保存签名密钥失败: {}", e)))?;
        Ok(())
    }
}
