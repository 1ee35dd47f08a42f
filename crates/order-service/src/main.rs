//! 订单服务入口
//!
//! 加载配置、初始化可观测性、连接 Postgres 与 Redis，组装仓储与服务，
//! 运行商品事件消费者直到收到 Ctrl+C / SIGTERM。

use std::sync::Arc;
use std::time::Duration;

use order_service::{
    OrderServiceConfig, PgOrderRepository, PgOrderService, PgProductRepository, PgQueryService,
    ProductEventConsumer, ProductEventHandler, ReadThroughCache,
};
use shop_shared::cache::{CacheBackend, RedisCache};
use shop_shared::config::AppConfig;
use shop_shared::database::Database;
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE_NAME: &str = "order-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = shop_shared::observability::init(SERVICE_NAME, &config.observability).await?;

    info!(
        environment = %config.environment,
        "Starting {}...", SERVICE_NAME
    );

    let db = Database::connect(&config.database).await?;
    db.prepare_schema("migrations").await?;

    let redis = RedisCache::new(&config.redis)?;
    if let Err(e) = redis.health_check().await {
        // Redis 不可用时依然启动，缓存调用会逐次超时并回源
        warn!(error = %e, "Redis 健康检查失败");
    }
    let backend: Arc<dyn CacheBackend> = Arc::new(redis);
    let cache = ReadThroughCache::new(backend, config.order.cache_timeout());

    let service_config = OrderServiceConfig::from(&config.order);
    let products = Arc::new(PgProductRepository::new(db.pool().clone()));
    let orders = Arc::new(PgOrderRepository::new(
        db.pool().clone(),
        Duration::from_millis(config.database.statement_timeout_ms),
    ));

    // 供路由层调用的服务句柄
    let _order_service = Arc::new(PgOrderService::new(
        products.clone(),
        orders.clone(),
        cache.clone(),
        service_config.clone(),
    ));
    let _query_service = Arc::new(PgQueryService::new(
        products,
        orders,
        cache.clone(),
        service_config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
        let _ = shutdown_tx.send(true);
    });

    let consumer = ProductEventConsumer::new(&config.kafka, ProductEventHandler::new(cache))?;
    info!("{} is ready", SERVICE_NAME);

    // 消费循环在主任务上运行，直到关闭信号到达
    consumer.run(shutdown_rx).await?;

    db.close().await;
    info!("{} stopped", SERVICE_NAME);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "无法监听 Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "无法监听 SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
