// PostgreSQL 存储实现，每个仓库实现对应的存储 trait，内存实现在各自的服务模块中

pub mod chat_event_repo;
pub mod inbox_repo;
pub mod jwk_key_repo;
pub mod token_audit_repo;

pub use chat_event_repo::PgChatEventRepository;
pub use inbox_repo::PgInboxRepository;
pub use jwk_key_repo::PgJwkKeyRepository;
pub use token_audit_repo::PgTokenAuditRepository;
