//! 基础设施层：PostgreSQL 仓储实现与连接池。

pub mod db;

pub use db::repositories::{PgChatRepository, PgMessageRepository, PgUserRepository};
pub use db::{create_pg_pool, DbPool};
