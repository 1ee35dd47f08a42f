//! 商品事件消费者
//!
//! 从 Kafka 消费商品生命周期事件（created / updated / deleted），只用作缓存失效信号。
//! 投递至少一次且可能乱序，失效操作本身幂等，因此重复或乱序消息都无害；
//! 事件负载里的库存和价格从不写回缓存，存储始终是唯一的数据来源。

use shop_shared::cache::CacheKey;
use shop_shared::config::KafkaConfig;
use shop_shared::events::{ProductEvent, topics};
use shop_shared::kafka::{ConsumerMessage, KafkaConsumer};
use shop_shared::observability::metrics as shop_metrics;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::service::ReadThroughCache;

/// 商品事件处理器
#[derive(Clone)]
pub struct ProductEventHandler {
    cache: ReadThroughCache,
}

impl ProductEventHandler {
    pub fn new(cache: ReadThroughCache) -> Self {
        Self { cache }
    }

    /// 无论事件类型，失效该商品及商品列表
    pub async fn handle(&self, event: &ProductEvent) {
        let product_id = event.product_id();
        self.cache
            .invalidate_all([CacheKey::product(product_id), CacheKey::all_products()])
            .await;

        shop_metrics::record_product_event(event.kind());
        debug!(product_id, kind = event.kind(), "商品缓存已失效");
    }

    /// 解码并处理单条消息，无法解码的消息记录后跳过
    pub async fn handle_message(&self, msg: &ConsumerMessage) {
        match ProductEvent::try_from(msg) {
            Ok(event) => self.handle(&event).await,
            Err(e) => {
                shop_metrics::record_product_event("invalid");
                warn!(
                    error = %e,
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    payload = %String::from_utf8_lossy(&msg.payload),
                    "商品事件无法解码，已跳过"
                );
            }
        }
    }
}

/// 商品事件消费者
pub struct ProductEventConsumer {
    consumer: KafkaConsumer,
    handler: ProductEventHandler,
}

impl ProductEventConsumer {
    pub fn new(config: &KafkaConfig, handler: ProductEventHandler) -> Result<Self> {
        let consumer = KafkaConsumer::new(config, Some("product-events"))?;
        Ok(Self { consumer, handler })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&topics::ALL)?;
        info!(topics = ?topics::ALL, "商品事件消费者已启动");

        let handler = self.handler;
        self.consumer
            .start(shutdown, |msg| {
                let handler = &handler;
                async move {
                    handler.handle_message(&msg).await;
                    Ok(())
                }
            })
            .await;

        info!("商品事件消费者已停止");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_shared::cache::{CacheBackend, MemoryCache};
    use std::sync::Arc;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    async fn seeded() -> (Arc<MemoryCache>, ProductEventHandler) {
        let memory = Arc::new(MemoryCache::new());
        for key in ["product:1", "product:2", "product:all", "order:1"] {
            memory.set(key, "{}", TTL).await.unwrap();
        }
        let cache = ReadThroughCache::new(memory.clone(), Duration::from_millis(100));
        (memory, ProductEventHandler::new(cache))
    }

    #[tokio::test]
    async fn test_updated_event_invalidates_product_keys() {
        let (memory, handler) = seeded().await;

        let msg = ConsumerMessage::new(
            topics::PRODUCT_UPDATED,
            r#"{"id":1,"name":"Desk","price":"120.00","stock_quantity":4}"#,
        );
        handler.handle_message(&msg).await;

        assert!(!memory.contains("product:1"));
        assert!(!memory.contains("product:all"));
        assert!(memory.contains("product:2"));
        assert!(memory.contains("order:1"));
    }

    #[tokio::test]
    async fn test_duplicate_and_out_of_order_delivery_is_harmless() {
        let (memory, handler) = seeded().await;

        let deleted = ConsumerMessage::new(topics::PRODUCT_DELETED, "2");
        let created = ConsumerMessage::new(
            topics::PRODUCT_CREATED,
            r#"{"id":2,"name":"Lamp","price":"15.50"}"#,
        );
        handler.handle_message(&deleted).await;
        handler.handle_message(&created).await;
        handler.handle_message(&deleted).await;

        assert!(!memory.contains("product:2"));
        assert!(memory.contains("product:1"));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_skipped() {
        let (memory, handler) = seeded().await;

        handler
            .handle_message(&ConsumerMessage::new(topics::PRODUCT_UPDATED, "not json"))
            .await;
        handler
            .handle_message(&ConsumerMessage::new("product.archived", "1"))
            .await;

        assert_eq!(memory.len(), 4);
    }
}
