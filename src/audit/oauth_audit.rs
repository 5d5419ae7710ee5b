//! OAuth 授权持久化的审计包装
//!
//! 授权码/同意流程由外部组件负责，这里只约定授权存储接口，并在其外层记录令牌审计：
//! `save` 先持久化再记录 access/refresh token；`remove` 先标记吊销再删除。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::audit::token_audit::TokenAuditLedger;
use crate::error::Result;

/// clientId 缓存容量与过期时间
const CLIENT_ID_CACHE_CAPACITY: u64 = 1_000;
const CLIENT_ID_CACHE_TTL: Duration = Duration::from_secs(600);

/// OAuth 签发的单个令牌
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthToken {
    pub value: String,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthTokenType {
    Access,
    Refresh,
}

/// 一次 OAuth 授权
#[derive(Debug, Clone, PartialEq)]
pub struct OAuthAuthorization {
    pub id: String,
    /// 注册客户端的内部 ID（不是对外的 client_id）
    pub registered_client_id: Option<String>,
    pub principal_name: Option<String>,
    pub access_token: Option<OAuthToken>,
    pub refresh_token: Option<OAuthToken>,
}

impl OAuthAuthorization {
    fn has_token(&self, value: &str, token_type: Option<OAuthTokenType>) -> bool {
        let access = self.access_token.as_ref().map(|t| t.value == value).unwrap_or(false);
        let refresh = self.refresh_token.as_ref().map(|t| t.value == value).unwrap_or(false);
        match token_type {
            Some(OAuthTokenType::Access) => access,
            Some(OAuthTokenType::Refresh) => refresh,
            None => access || refresh,
        }
    }
}

/// 授权存储接口
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    async fn save(&self, authorization: &OAuthAuthorization) -> Result<()>;
    async fn remove(&self, authorization: &OAuthAuthorization) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<OAuthAuthorization>>;
    async fn find_by_token(
        &self,
        token: &str,
        token_type: Option<OAuthTokenType>,
    ) -> Result<Option<OAuthAuthorization>>;
}

/// 注册客户端查询（内部 ID → client_id）
#[async_trait]
pub trait RegisteredClientLookup: Send + Sync {
    async fn client_id(&self, registered_client_id: &str) -> Result<Option<String>>;
}

/// 内存授权存储
#[derive(Default)]
pub struct MemoryAuthorizationStore {
    authorizations: DashMap<String, OAuthAuthorization>,
}

impl MemoryAuthorizationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuthorizationStore for MemoryAuthorizationStore {
    async fn save(&self, authorization: &OAuthAuthorization) -> Result<()> {
        self.authorizations
            .insert(authorization.id.clone(), authorization.clone());
        Ok(())
    }

    async fn remove(&self, authorization: &OAuthAuthorization) -> Result<()> {
        self.authorizations.remove(&authorization.id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OAuthAuthorization>> {
        Ok(self.authorizations.get(id).map(|a| a.clone()))
    }

    async fn find_by_token(
        &self,
        token: &str,
        token_type: Option<OAuthTokenType>,
    ) -> Result<Option<OAuthAuthorization>> {
        Ok(self
            .authorizations
            .iter()
            .find(|a| a.has_token(token, token_type))
            .map(|a| a.value().clone()))
    }
}

/// 内存客户端注册表
#[derive(Default)]
pub struct MemoryClientRegistry {
    clients: DashMap<String, String>,
}

impl MemoryClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registered_client_id: &str, client_id: &str) {
        self.clients
            .insert(registered_client_id.to_string(), client_id.to_string());
    }
}

#[async_trait]
impl RegisteredClientLookup for MemoryClientRegistry {
    async fn client_id(&self, registered_client_id: &str) -> Result<Option<String>> {
        Ok(self.clients.get(registered_client_id).map(|c| c.clone()))
    }
}

/// 带审计的授权存储
pub struct AuditingAuthorizationStore<S> {
    inner: S,
    clients: Arc<dyn RegisteredClientLookup>,
    ledger: Arc<TokenAuditLedger>,
    client_ids: Cache<String, String>,
}

impl<S: AuthorizationStore> AuditingAuthorizationStore<S> {
    pub fn new(inner: S, clients: Arc<dyn RegisteredClientLookup>, ledger: Arc<TokenAuditLedger>) -> Self {
        let client_ids = Cache::builder()
            .max_capacity(CLIENT_ID_CACHE_CAPACITY)
            .time_to_live(CLIENT_ID_CACHE_TTL)
            .build();
        Self {
            inner,
            clients,
            ledger,
            client_ids,
        }
    }

    /// 客户端被修改或删除后调用
    pub async fn invalidate_client(&self, registered_client_id: &str) {
        self.client_ids.invalidate(registered_client_id).await;
    }

    /// 查不到注册客户端时退回内部 ID
    async fn resolve_client_id(&self, registered_client_id: Option<&str>) -> Result<Option<String>> {
        let registered_client_id = match registered_client_id {
            Some(id) => id,
            None => return Ok(None),
        };
        if let Some(client_id) = self.client_ids.get(registered_client_id).await {
            return Ok(Some(client_id));
        }
        match self.clients.client_id(registered_client_id).await? {
            Some(client_id) => {
                self.client_ids
                    .insert(registered_client_id.to_string(), client_id.clone())
                    .await;
                Ok(Some(client_id))
            }
            None => Ok(Some(registered_client_id.to_string())),
        }
    }
}

#[async_trait]
impl<S: AuthorizationStore> AuthorizationStore for AuditingAuthorizationStore<S> {
    async fn save(&self, authorization: &OAuthAuthorization) -> Result<()> {
        self.inner.save(authorization).await?;

        let client_id = self
            .resolve_client_id(authorization.registered_client_id.as_deref())
            .await?;
        let username = authorization.principal_name.as_deref();

        if let Some(token) = &authorization.access_token {
            self.ledger
                .record_oauth_access_token(
                    &token.value,
                    username,
                    client_id.as_deref(),
                    &authorization.id,
                    token.issued_at,
                    token.expires_at,
                )
                .await?;
        }
        if let Some(token) = &authorization.refresh_token {
            self.ledger
                .record_oauth_refresh_token(
                    &token.value,
                    username,
                    client_id.as_deref(),
                    &authorization.id,
                    token.issued_at,
                    token.expires_at,
                )
                .await?;
        }
        Ok(())
    }

    async fn remove(&self, authorization: &OAuthAuthorization) -> Result<()> {
        if let Err(e) = self
            .ledger
            .mark_revoked_by_authorization_id(&authorization.id)
            .await
        {
            // 审计失败不阻止删除授权
            warn!("⚠️ 标记 OAuth 令牌吊销失败: authorization_id={}, error={}", authorization.id, e);
        }
        self.inner.remove(authorization).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<OAuthAuthorization>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_token(
        &self,
        token: &str,
        token_type: Option<OAuthTokenType>,
    ) -> Result<Option<OAuthAuthorization>> {
        self.inner.find_by_token(token, token_type).await
    }
}
