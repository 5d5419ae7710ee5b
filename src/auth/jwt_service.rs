use crate::auth::key_manager::SigningKey;
use crate::auth::models::{AccessTokenClaims, AppPrincipal, IssuedAccessToken, APP_SCOPE};
use crate::error::{Result, ServerError};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// App access token 签发和验证服务 (RS256)
pub struct JwtService {
    signing_key: Arc<SigningKey>,
    issuer: String,
}

impl JwtService {
    /// 创建 JWT 服务
    ///
    /// issuer 为空属于配置错误，在启动时直接失败
    pub fn new(signing_key: Arc<SigningKey>, issuer: impl Into<String>) -> Result<Self> {
        let issuer = issuer.into();
        if issuer.trim().is_empty() {
            return Err(ServerError::Configuration("issuer must be configured".to_string()));
        }
        Ok(Self {
            signing_key,
            issuer,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// 签发 token
    pub fn issue(&self, username: &str, device_id: Uuid, ttl_secs: i64) -> Result<IssuedAccessToken> {
        let now = Utc::now().timestamp();
        let exp = now + ttl_secs;

        let claims = AccessTokenClaims {
            iss: Some(self.issuer.clone()),
            sub: Some(username.to_string()),
            iat: Some(now),
            exp: Some(exp),
            scope: Some(APP_SCOPE.to_string()),
            device_id: Some(device_id.to_string()),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.signing_key.kid.clone());

        let token = encode(&header, &claims, self.signing_key.encoding_key())
            .map_err(|e| ServerError::Internal(format!("JWT 签发失败: {}", e)))?;

        Ok(IssuedAccessToken {
            token,
            issued_at: timestamp_to_datetime(now),
            expires_at: timestamp_to_datetime(exp),
        })
    }

    /// 验证 token
    ///
    /// 任何校验失败都返回 None，不区分原因
    pub fn verify(&self, token: &str) -> Option<AppPrincipal> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = 0;

        let claims = match decode::<AccessTokenClaims>(token, self.signing_key.decoding_key(), &validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("access token 校验失败: {}", e);
                return None;
            }
        };

        if claims.scope.as_deref() != Some(APP_SCOPE) {
            return None;
        }

        let username = claims.sub.filter(|s| !s.trim().is_empty())?;
        let device_id = claims
            .device_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok())?;
        let issued_at = claims
            .iat
            .map(timestamp_to_datetime)
            .unwrap_or_else(Utc::now);

        Some(AppPrincipal {
            username,
            device_id,
            issued_at,
        })
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::key_manager::test_signing_key;

    const ISSUER: &str = "https://auth.test";

    fn service() -> JwtService {
        JwtService::new(test_signing_key(), ISSUER).unwrap()
    }

    fn sign_raw(claims: &AccessTokenClaims) -> String {
        let key = test_signing_key();
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(key.kid.clone());
        encode(&header, claims, key.encoding_key()).unwrap()
    }

    fn valid_claims() -> AccessTokenClaims {
        let now = Utc::now().timestamp();
        AccessTokenClaims {
            iss: Some(ISSUER.to_string()),
            sub: Some("app".to_string()),
            iat: Some(now),
            exp: Some(now + 300),
            scope: Some("app".to_string()),
            device_id: Some(Uuid::new_v4().to_string()),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let jwt = service();
        let device_id = Uuid::new_v4();

        for ttl in [1, 600, 43_200] {
            let issued = jwt.issue("app", device_id, ttl).unwrap();
            assert_eq!((issued.expires_at - issued.issued_at).num_seconds(), ttl);

            let principal = jwt.verify(&issued.token).unwrap();
            assert_eq!(principal.username, "app");
            assert_eq!(principal.device_id, device_id);
            assert_eq!(principal.issued_at, issued.issued_at);
        }
    }

    #[test]
    fn test_header_carries_kid() {
        let jwt = service();
        let issued = jwt.issue("app", Uuid::new_v4(), 60).unwrap();
        let header = jsonwebtoken::decode_header(&issued.token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid, Some(test_signing_key().kid.clone()));
    }

    #[test]
    fn test_blank_issuer_is_configuration_error() {
        let result = JwtService::new(test_signing_key(), "  ");
        assert!(matches!(result, Err(ServerError::Configuration(_))));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let jwt = service();
        assert!(jwt.verify("").is_none());
        assert!(jwt.verify("   ").is_none());
        assert!(jwt.verify("invalid.token.here").is_none());
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let jwt = service();
        let issued = jwt.issue("app", Uuid::new_v4(), 60).unwrap();
        let mut parts: Vec<String> = issued.token.split('.').map(String::from).collect();
        parts[1] = parts[1].chars().rev().collect();
        assert!(jwt.verify(&parts.join(".")).is_none());
    }

    #[test]
    fn test_verify_rejects_expired() {
        let mut claims = valid_claims();
        claims.iat = Some(Utc::now().timestamp() - 120);
        claims.exp = Some(Utc::now().timestamp() - 60);
        assert!(service().verify(&sign_raw(&claims)).is_none());
    }

    #[test]
    fn test_verify_rejects_missing_exp() {
        let mut claims = valid_claims();
        claims.exp = None;
        assert!(service().verify(&sign_raw(&claims)).is_none());
    }

    #[test]
    fn test_verify_rejects_issuer_mismatch() {
        let mut claims = valid_claims();
        claims.iss = Some("https://other".to_string());
        assert!(service().verify(&sign_raw(&claims)).is_none());
    }

    #[test]
    fn test_verify_rejects_wrong_scope() {
        let mut claims = valid_claims();
        claims.scope = Some("openid".to_string());
        assert!(service().verify(&sign_raw(&claims)).is_none());

        claims.scope = None;
        assert!(service().verify(&sign_raw(&claims)).is_none());
    }

    #[test]
    fn test_verify_rejects_bad_device_id_or_subject() {
        let mut claims = valid_claims();
        claims.device_id = Some("not-a-uuid".to_string());
        assert!(service().verify(&sign_raw(&claims)).is_none());

        let mut claims = valid_claims();
        claims.device_id = None;
        assert!(service().verify(&sign_raw(&claims)).is_none());

        let mut claims = valid_claims();
        claims.sub = None;
        assert!(service().verify(&sign_raw(&claims)).is_none());
    }

    #[test]
    fn test_missing_iat_defaults_to_now() {
        let mut claims = valid_claims();
        claims.iat = None;
        let before = Utc::now() - chrono::Duration::seconds(1);
        let principal = service().verify(&sign_raw(&claims)).unwrap();
        assert!(principal.issued_at >= before);
    }
}
