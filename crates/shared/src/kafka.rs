//! Kafka 消费端封装
//!
//! 通知通道的传输层。将 rdkafka 的 `StreamConsumer` 封装为带优雅关闭语义的
//! 消费循环，业务方只需提供按消息处理的异步闭包。
//!
//! 投递语义为至少一次（at-least-once），处理函数必须是幂等的。

use std::collections::HashMap;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::KafkaConfig;
use crate::error::ShopError;

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的消息的所有权表示
///
/// `BorrowedMessage` 受消费者生命周期约束，转换后才能跨 await 点传递。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    /// 以 topic 和负载构造消息（测试和本地回放使用）
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: None,
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回
    pub fn payload_str(&self) -> Result<&str, ShopError> {
        std::str::from_utf8(&self.payload)
            .map_err(|e| ShopError::Kafka(format!("负载非 UTF-8 编码: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaConsumer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 消费者
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// 创建消费者
    ///
    /// `group_id_suffix` 让同一服务内的不同消费逻辑使用独立的消费组
    pub fn new(config: &KafkaConfig, group_id_suffix: Option<&str>) -> Result<Self, ShopError> {
        let group_id = match group_id_suffix {
            Some(suffix) => format!("{}.{}", config.consumer_group, suffix),
            None => config.consumer_group.clone(),
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create()
            .map_err(|e| ShopError::Kafka(format!("创建消费者失败: {e}")))?;

        info!(brokers = %config.brokers, group_id, "Kafka 消费者已初始化");
        Ok(Self { consumer })
    }

    /// 订阅指定的 topic 列表
    pub fn subscribe(&self, topics: &[&str]) -> Result<(), ShopError> {
        self.consumer
            .subscribe(topics)
            .map_err(|e| ShopError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(?topics, "已订阅 Kafka topics");
        Ok(())
    }

    /// 启动消费循环，直到关闭信号变为 `true`
    ///
    /// handler 返回错误只记录日志，单条坏消息不会中断循环
    pub async fn start<F, Fut>(self, mut shutdown: watch::Receiver<bool>, handler: F)
    where
        F: Fn(ConsumerMessage) -> Fut,
        Fut: std::future::Future<Output = Result<(), ShopError>>,
    {
        use futures::StreamExt;

        let stream = self.consumer.stream();
        futures::pin_mut!(stream);

        info!("Kafka 消费循环已启动");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("收到关闭信号，Kafka 消费循环退出");
                        break;
                    }
                }

                msg_result = stream.next() => {
                    let Some(msg_result) = msg_result else {
                        warn!("Kafka 消息流意外结束");
                        break;
                    };

                    // 借用消息在进入 handler 前释放
                    let msg = match msg_result {
                        Ok(borrowed_msg) => ConsumerMessage::from_borrowed(&borrowed_msg),
                        Err(e) => {
                            error!(error = %e, "接收 Kafka 消息出错");
                            continue;
                        }
                    };
                    debug!(
                        topic = %msg.topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        "收到 Kafka 消息"
                    );

                    if let Err(e) = handler(msg).await {
                        error!(error = %e, "处理 Kafka 消息失败");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_message_new() {
        let msg = ConsumerMessage::new("product.deleted", "42");

        assert_eq!(msg.topic, "product.deleted");
        assert_eq!(msg.offset, 0);
        assert!(msg.key.is_none());
        assert_eq!(msg.payload_str().unwrap(), "42");
    }

    #[test]
    fn test_payload_str_invalid_utf8() {
        let msg = ConsumerMessage::new("product.updated", vec![0xFF, 0xFE]);
        assert!(msg.payload_str().is_err());
    }
}
