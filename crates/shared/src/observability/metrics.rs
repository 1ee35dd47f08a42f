//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 与 `/health` 端点。
pub async fn init(service_name: &str, port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("orders_placed_total", "Total number of placed orders");
    metrics::describe_counter!(
        "order_place_failures_total",
        "Rejected or failed order placements by reason"
    );
    metrics::describe_histogram!(
        "order_place_duration_seconds",
        "Order placement duration in seconds"
    );
    metrics::describe_counter!(
        "order_stock_conflicts_total",
        "Conditional stock decrements lost to a concurrent order"
    );
    metrics::describe_counter!(
        "order_transitions_total",
        "Order status transitions by target status and result"
    );
    metrics::describe_counter!(
        "cache_requests_total",
        "Read-through cache lookups by result"
    );
    metrics::describe_counter!(
        "product_events_total",
        "Consumed product lifecycle events by kind"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录下单结果，`reason` 为 None 表示成功
#[inline]
pub fn record_order_placement(reason: Option<&str>, duration_secs: f64) {
    match reason {
        None => metrics::counter!("orders_placed_total").increment(1),
        Some(reason) => {
            metrics::counter!("order_place_failures_total", "reason" => reason.to_string())
                .increment(1)
        }
    }
    metrics::histogram!("order_place_duration_seconds").record(duration_secs);
}

/// 记录条件扣减库存的竞争失败
#[inline]
pub fn record_stock_conflict() {
    metrics::counter!("order_stock_conflicts_total").increment(1);
}

/// 记录状态流转
#[inline]
pub fn record_order_transition(status: &str, result: &str) {
    metrics::counter!(
        "order_transitions_total",
        "status" => status.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// 记录缓存查询结果（hit / miss / error）
#[inline]
pub fn record_cache_request(result: &'static str) {
    metrics::counter!("cache_requests_total", "result" => result).increment(1);
}

/// 记录消费到的商品事件
#[inline]
pub fn record_product_event(kind: &'static str) {
    metrics::counter!("product_events_total", "kind" => kind).increment(1);
}
