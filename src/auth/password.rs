//! 密码与设备令牌哈希
//!
//! 使用 bcrypt 算法（自适应哈希）。主密码、管理员密码和设备令牌都只以哈希形式保存。

use crate::error::{Result, ServerError};
use bcrypt::{hash, verify, DEFAULT_COST};

/// 默认哈希成本
///
/// 成本值越高越安全，但也越慢：
/// - 10: 约 80ms
/// - 12: 约 300ms（默认）
/// - 14: 约 1200ms
pub const PASSWORD_COST: u32 = DEFAULT_COST;

/// 使用指定成本生成哈希
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String> {
    hash(password, cost).map_err(|e| ServerError::Internal(format!("密码加密失败: {}", e)))
}

/// 使用默认成本生成哈希
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_cost(password, PASSWORD_COST)
}

/// 比较明文与哈希
///
/// 哈希格式损坏时视为不匹配，凭证校验只有匹配/不匹配两种结果
pub fn verify_password(password: &str, hash: &str) -> bool {
    match verify(password, hash) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!("⚠️ bcrypt 哈希格式无效: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password() {
        let hash = hash_password_with_cost("secret123", 4).unwrap();

        // bcrypt 哈希总是 60 字符
        assert_eq!(hash.len(), 60);
        assert!(hash.starts_with("$2b$04$"));
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password_with_cost("secret123", 4).unwrap();

        assert!(verify_password("secret123", &hash));
        assert!(!verify_password("wrong_password", &hash));
    }

    #[test]
    fn test_same_password_different_hash() {
        let hash1 = hash_password_with_cost("secret123", 4).unwrap();
        let hash2 = hash_password_with_cost("secret123", 4).unwrap();

        // salt 不同，哈希值不同
        assert_ne!(hash1, hash2);
        assert!(verify_password("secret123", &hash1));
        assert!(verify_password("secret123", &hash2));
    }

    #[test]
    fn test_malformed_hash_is_mismatch() {
        assert!(!verify_password("secret123", "not-a-bcrypt-hash"));
    }
}
