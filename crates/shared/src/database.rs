//! Postgres 连接池与模式准备
//!
//! 订单引擎依赖 `products`、`orders`、`order_items` 三张表。启动时先迁移，
//! 再确认这三张表都存在，缺表时拒绝启动而不是在第一笔订单时才失败。

use crate::config::DatabaseConfig;
use crate::error::{Result, ShopError};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// 订单引擎需要的表
pub const REQUIRED_TABLES: [&str; 3] = ["products", "orders", "order_items"];

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 建立连接池
    ///
    /// 日志中只出现去掉凭据后的地址
    #[instrument(skip(config), fields(target = %redact_url(&config.url)))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        check_pool_bounds(config)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            statement_timeout_ms = config.statement_timeout_ms,
            "订单库连接池已就绪"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 应用迁移并确认订单表齐全
    ///
    /// 迁移目录在运行时解析，测试与二进制可以指向不同位置
    #[instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub async fn prepare_schema(&self, dir: impl AsRef<Path>) -> Result<()> {
        let migrator = Migrator::new(dir.as_ref()).await?;
        migrator.run(&self.pool).await?;
        info!(migrations = migrator.iter().count(), "迁移已应用");

        self.verify_schema().await
    }

    /// 逐表检查存在性，返回第一张缺失的表
    pub async fn verify_schema(&self) -> Result<()> {
        for table in REQUIRED_TABLES {
            let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                .bind(table)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                return Err(ShopError::Internal(format!("缺少数据表: {table}")));
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("订单库连接池已关闭");
    }
}

fn check_pool_bounds(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 || config.min_connections > config.max_connections {
        return Err(ShopError::Internal(format!(
            "连接池上下限无效: min={}, max={}",
            config.min_connections, config.max_connections
        )));
    }
    Ok(())
}

/// 去掉 `user:password@` 与查询参数，只保留 scheme、主机和库名
pub fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "<invalid>".to_string();
    };
    let rest = rest.split('?').next().unwrap_or_default();
    let location = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
    format!("{scheme}://{location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url_drops_credentials() {
        assert_eq!(
            redact_url("postgres://shop:shop_secret@db:5432/shop_db?sslmode=disable"),
            "postgres://db:5432/shop_db"
        );
        assert_eq!(
            redact_url("postgres://localhost/shop_db"),
            "postgres://localhost/shop_db"
        );
        assert_eq!(redact_url("not a url"), "<invalid>");
    }

    #[test]
    fn test_pool_bounds() {
        assert!(check_pool_bounds(&DatabaseConfig::default()).is_ok());

        let inverted = DatabaseConfig {
            min_connections: 20,
            max_connections: 5,
            ..DatabaseConfig::default()
        };
        assert!(check_pool_bounds(&inverted).is_err());

        let empty = DatabaseConfig {
            min_connections: 0,
            max_connections: 0,
            ..DatabaseConfig::default()
        };
        assert!(check_pool_bounds(&empty).is_err());
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_prepare_schema() {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        db.prepare_schema(concat!(env!("CARGO_MANIFEST_DIR"), "/../../migrations"))
            .await
            .unwrap();
        db.verify_schema().await.unwrap();
    }
}
