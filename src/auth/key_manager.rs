//! 签名密钥管理
//!
//! 持有唯一的 RSA-2048 签名密钥对：首次使用时生成并持久化，之后重启复用，
//! 以保证 JWKS 文档与已签发的令牌持续有效。

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, ServerError};

/// RSA 模数位数
pub const RSA_KEY_BITS: usize = 2048;

/// 持久化形式：base64(DER)，私钥 PKCS#8，公钥 SPKI
#[derive(Debug, Clone)]
pub struct StoredKey {
    pub kid: String,
    pub public_key: String,
    pub private_key: String,
    pub created_at: DateTime<Utc>,
}

/// 密钥存储接口
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// 按创建时间取最早的一把
    async fn load_oldest(&self) -> Result<Option<StoredKey>>;
    async fn insert(&self, key: &StoredKey) -> Result<()>;
}

/// 内存密钥存储（开发/测试）
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<Vec<StoredKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn load_oldest(&self) -> Result<Option<StoredKey>> {
        let keys = self.keys.lock().await;
        Ok(keys.iter().min_by_key(|k| k.created_at).cloned())
    }

    async fn insert(&self, key: &StoredKey) -> Result<()> {
        self.keys.lock().await.push(key.clone());
        Ok(())
    }
}

/// 可用的签名密钥
pub struct SigningKey {
    pub kid: String,
    pub created_at: DateTime<Utc>,
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    pub fn from_private_key(
        kid: String,
        private_key: &RsaPrivateKey,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        let public_key = RsaPublicKey::from(private_key);
        let pkcs1 = private_key
            .to_pkcs1_der()
            .map_err(|e| ServerError::Crypto(format!("私钥编码失败: {}", e)))?;
        let encoding_key = EncodingKey::from_rsa_der(pkcs1.as_bytes());
        let (n, e) = jwk_components(&public_key);
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| ServerError::Crypto(format!("公钥编码失败: {}", e)))?;

        Ok(Self {
            kid,
            created_at,
            public_key,
            encoding_key,
            decoding_key,
        })
    }

    fn from_stored(stored: &StoredKey) -> Result<Self> {
        let der = STANDARD
            .decode(stored.private_key.as_bytes())
            .map_err(|e| ServerError::Crypto(format!("私钥 base64 解码失败: {}", e)))?;
        let private_key = RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| ServerError::Crypto(format!("私钥解析失败: {}", e)))?;
        Self::from_private_key(stored.kid.clone(), &private_key, stored.created_at)
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// 单个 JWK
    pub fn to_jwk(&self) -> Value {
        let (n, e) = jwk_components(&self.public_key);
        json!({
            "kty": "RSA",
            "kid": self.kid,
            "use": "sig",
            "alg": "RS256",
            "n": n,
            "e": e,
        })
    }
}

/// 临时生成的 PEM 密钥对（管理后台工具）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PemKeyPair {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

/// 签名密钥管理器
pub struct KeyManager {
    store: Arc<dyn KeyStore>,
    key: OnceCell<Arc<SigningKey>>,
}

impl KeyManager {
    pub fn new(store: Arc<dyn KeyStore>) -> Self {
        Self {
            store,
            key: OnceCell::new(),
        }
    }

    /// 使用已有密钥构造（不触发存储）
    pub fn with_key(store: Arc<dyn KeyStore>, key: Arc<SigningKey>) -> Self {
        Self {
            store,
            key: OnceCell::new_with(Some(key)),
        }
    }

    /// 加载或创建签名密钥
    ///
    /// 并发的首次调用只会生成一次；插入后重新读取最早的一把，多实例同时启动时收敛到同一密钥
    pub async fn load_or_create(&self) -> Result<Arc<SigningKey>> {
        self.key
            .get_or_try_init(|| async {
                if let Some(stored) = self.store.load_oldest().await? {
                    info!("🔑 已加载签名密钥: kid={}", stored.kid);
                    return SigningKey::from_stored(&stored).map(Arc::new);
                }

                info!("🔑 未找到签名密钥，生成新的 RSA-{} 密钥对...", RSA_KEY_BITS);
                let stored = tokio::task::spawn_blocking(generate_stored_key)
                    .await
                    .map_err(|e| ServerError::Internal(format!("密钥生成任务失败: {}", e)))??;
                self.store.insert(&stored).await?;

                let winner = self.store.load_oldest().await?.unwrap_or(stored);
                info!("✅ 签名密钥已就绪: kid={}", winner.kid);
                SigningKey::from_stored(&winner).map(Arc::new)
            })
            .await
            .cloned()
    }

    /// 公钥集合（JWKS）
    pub async fn public_jwks(&self) -> Result<Value> {
        let key = self.load_or_create().await?;
        Ok(json!({ "keys": [key.to_jwk()] }))
    }
}

fn jwk_components(public_key: &RsaPublicKey) -> (String, String) {
    (
        URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    )
}

fn generate_private_key() -> Result<RsaPrivateKey> {
    let mut rng = rand::thread_rng();
    Ok(RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?)
}

fn generate_stored_key() -> Result<StoredKey> {
    let private_key = generate_private_key()?;
    let public_key = RsaPublicKey::from(&private_key);

    let private_der = private_key
        .to_pkcs8_der()
        .map_err(|e| ServerError::Crypto(format!("私钥编码失败: {}", e)))?;
    let public_der = public_key
        .to_public_key_der()
        .map_err(|e| ServerError::Crypto(format!("公钥编码失败: {}", e)))?;

    Ok(StoredKey {
        kid: Uuid::new_v4().to_string(),
        public_key: STANDARD.encode(public_der.as_bytes()),
        private_key: STANDARD.encode(private_der.as_bytes()),
        created_at: Utc::now(),
    })
}

/// 由 JWK 的 e/n 参数还原 PEM 公钥
pub fn public_key_pem_from_jwk(e: &str, n: &str) -> Result<String> {
    let invalid = || ServerError::Validation("invalid jwk parameters".to_string());

    let decode = |value: &str| -> Result<BigUint> {
        let trimmed = value.trim().trim_end_matches('=');
        if trimmed.is_empty() {
            return Err(invalid());
        }
        let bytes = URL_SAFE_NO_PAD.decode(trimmed).map_err(|_| invalid())?;
        let number = BigUint::from_bytes_be(&bytes);
        if number == BigUint::from(0u32) {
            return Err(invalid());
        }
        Ok(number)
    };

    let public_key = RsaPublicKey::new(decode(n)?, decode(e)?).map_err(|_| invalid())?;
    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| ServerError::Crypto(format!("公钥 PEM 编码失败: {}", e)))
}

/// 生成一对与服务签名密钥无关的 PEM 密钥
pub async fn generate_ephemeral_key_pair() -> Result<PemKeyPair> {
    tokio::task::spawn_blocking(|| {
        let private_key = generate_private_key()?;
        let public_key = RsaPublicKey::from(&private_key);
        let private_key_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ServerError::Crypto(format!("私钥 PEM 编码失败: {}", e)))?
            .to_string();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ServerError::Crypto(format!("公钥 PEM 编码失败: {}", e)))?;
        Ok(PemKeyPair {
            public_key_pem,
            private_key_pem,
        })
    })
    .await
    .map_err(|e| ServerError::Internal(format!("密钥生成任务失败: {}", e)))?
}

/// 测试共用的签名密钥，每个测试进程只生成一次
#[cfg(test)]
pub(crate) fn test_signing_key() -> Arc<SigningKey> {
    use std::sync::OnceLock;
    static KEY: OnceLock<Arc<SigningKey>> = OnceLock::new();
    KEY.get_or_init(|| {
        let stored = generate_stored_key().unwrap();
        Arc::new(SigningKey::from_stored(&stored).unwrap())
    })
    .clone()
}
