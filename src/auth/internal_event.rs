//! 内部事件签名校验
//!
//! 内部服务通过 webhook 推送事件时携带两个请求头：
//! `X-App-Timestamp`（十进制 Unix 秒）与 `X-App-Signature`（hex 编码的
//! HMAC-SHA256，签名内容为 `"{timestamp}.{body}"`）。时间戳与服务器时钟相差超过 300 秒即视为重放。

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Result, ServerError};

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "X-App-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-App-Signature";
/// 允许的时钟偏差（秒）
pub const MAX_SKEW_SECS: i64 = 300;

/// 内部事件签名校验器
#[derive(Clone)]
pub struct InternalEventVerifier {
    secret: Option<String>,
}

impl InternalEventVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    /// 校验请求
    ///
    /// 校验失败为 `Unauthorized`，未配置密钥为 `Configuration`
    pub fn verify(&self, timestamp: Option<&str>, signature: Option<&str>, body: &str) -> Result<()> {
        self.verify_at(timestamp, signature, body, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &str,
        now: i64,
    ) -> Result<()> {
        let (timestamp, signature) = match (
            timestamp.map(str::trim).filter(|s| !s.is_empty()),
            signature.map(str::trim).filter(|s| !s.is_empty()),
        ) {
            (Some(ts), Some(sig)) => (ts, sig),
            _ => return Err(unauthorized("missing internal signature headers")),
        };

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| unauthorized("invalid internal timestamp"))?;
        if now.abs_diff(ts) > MAX_SKEW_SECS.unsigned_abs() {
            return Err(unauthorized("expired internal request"));
        }

        let expected = self.sign(ts, body)?;
        let provided = signature.to_ascii_lowercase();
        if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
            return Err(unauthorized("invalid internal signature"));
        }
        Ok(())
    }

    /// 计算签名（hex 小写）
    pub fn sign(&self, timestamp: i64, body: &str) -> Result<String> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            ServerError::Configuration("internal webhook secret is not configured".to_string())
        })?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ServerError::Crypto(format!("HMAC 初始化失败: {}", e)))?;
        mac.update(format!("{}.{}", timestamp, body).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

fn unauthorized(message: &str) -> ServerError {
    ServerError::Unauthorized(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"chatId":"c1","runId":"r1"}"#;

    fn verifier() -> InternalEventVerifier {
        InternalEventVerifier::new(Some("s3cret".to_string()))
    }

    #[test]
    fn test_sign_is_deterministic_lower_hex() {
        let v = InternalEventVerifier::new(Some("key".to_string()));
        let sig = v.sign(1_700_000_000, "hello").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig, v.sign(1_700_000_000, "hello").unwrap());
        assert_ne!(sig, v.sign(1_700_000_001, "hello").unwrap());
    }

    #[test]
    fn test_verify_rejects_extreme_timestamps() {
        let v = verifier();
        for ts in [i64::MIN.to_string(), i64::MAX.to_string()] {
            let err = v.verify(Some(&ts), Some("ab"), "{}").unwrap_err();
            assert!(matches!(err, ServerError::Unauthorized(ref m) if m == "expired internal request"));
        }
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let v = verifier();
        let now = Utc::now().timestamp();
        let sig = v.sign(now, BODY).unwrap();
        assert!(v.verify(Some(&now.to_string()), Some(&sig), BODY).is_ok());
        // 大写 hex 也接受
        assert!(v
            .verify(Some(&now.to_string()), Some(&sig.to_ascii_uppercase()), BODY)
            .is_ok());
    }

    #[test]
    fn test_verify_rejects_missing_headers() {
        let v = verifier();
        for (ts, sig) in [(None, Some("ab")), (Some("1"), None), (Some(" "), Some("ab"))] {
            let err = v.verify(ts, sig, BODY).unwrap_err();
            assert_eq!(err.detail(), "missing internal signature headers");
        }
    }

    #[test]
    fn test_verify_rejects_bad_timestamp() {
        let err = verifier().verify(Some("abc"), Some("ab"), BODY).unwrap_err();
        assert_eq!(err.detail(), "invalid internal timestamp");
    }

    #[test]
    fn test_verify_skew_window() {
        let v = verifier();
        let now = 1_700_000_000;
        for offset in [-300, 0, 300] {
            let ts = now + offset;
            let sig = v.sign(ts, BODY).unwrap();
            assert!(v.verify_at(Some(&ts.to_string()), Some(&sig), BODY, now).is_ok());
        }
        for offset in [-301, 301] {
            let ts = now + offset;
            let sig = v.sign(ts, BODY).unwrap();
            let err = v
                .verify_at(Some(&ts.to_string()), Some(&sig), BODY, now)
                .unwrap_err();
            assert_eq!(err.detail(), "expired internal request");
        }
    }

    #[test]
    fn test_verify_rejects_tampered_body_or_signature() {
        let v = verifier();
        let now = Utc::now().timestamp();
        let sig = v.sign(now, BODY).unwrap();
        let ts = now.to_string();

        let err = v.verify(Some(&ts), Some(&sig), "{}").unwrap_err();
        assert_eq!(err.detail(), "invalid internal signature");

        let other = InternalEventVerifier::new(Some("other".to_string()))
            .sign(now, BODY)
            .unwrap();
        assert!(v.verify(Some(&ts), Some(&other), BODY).is_err());
        assert!(v.verify(Some(&ts), Some("deadbeef"), BODY).is_err());
    }

    #[test]
    fn test_missing_secret_is_configuration_error() {
        let v = InternalEventVerifier::new(Some("  ".to_string()));
        assert!(matches!(v.sign(1, BODY), Err(ServerError::Configuration(_))));

        let now = Utc::now().timestamp().to_string();
        let err = v.verify(Some(&now), Some("ab"), BODY).unwrap_err();
        assert!(matches!(err, ServerError::Configuration(_)));
    }
}
