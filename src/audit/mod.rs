// 令牌审计模块 - 统一记录 App 与 OAuth 令牌

pub mod oauth_audit;
pub mod token_audit;

pub use oauth_audit::{
    AuditingAuthorizationStore, AuthorizationStore, MemoryAuthorizationStore,
    MemoryClientRegistry, OAuthAuthorization, OAuthToken, OAuthTokenType,
    RegisteredClientLookup,
};
pub use token_audit::{
    MemoryTokenAuditStore, TokenAuditEntry, TokenAuditLedger, TokenAuditRecord,
    TokenAuditStore, TokenAuditView, TokenSource, TokenStatus, TOKEN_AUDIT_RETENTION,
};
