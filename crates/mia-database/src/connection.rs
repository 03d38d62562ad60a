//! 数据库连接管理

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use mia_core::config::DatabaseConfig;
use mia_core::{ArchiveError, Result};

/// 数据库连接池
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// 按配置建立连接池
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| ArchiveError::Database(e.to_string()))?;

        tracing::info!(
            max_connections = config.max_connections,
            "connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// 从既有连接池构造，测试与嵌入场景使用
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
