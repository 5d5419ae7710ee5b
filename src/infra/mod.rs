// Infrastructure layer - 基础设施层
// 负责各种基础服务：数据库连接与迁移、推送连接管理、Prometheus 指标

pub mod connection_manager;
pub mod database;
pub mod metrics;

// 重新导出主要类型
pub use connection_manager::{ChannelConnection, ConnectionManager, PushBinding, PushConnection};
pub use database::Database;
