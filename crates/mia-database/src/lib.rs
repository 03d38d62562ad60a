//! # MIA数据库模块
//!
//! 负责影像元数据层级的存储：PostgreSQL连接池、表结构、
//! find-or-create原语与读模型查询。

pub mod connection;
pub mod models;
pub mod repository;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use models::*;
pub use repository::HierarchyRepository;
