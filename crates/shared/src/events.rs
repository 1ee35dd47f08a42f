//! 商品生命周期事件
//!
//! 目录服务在商品创建、更新、删除后发布事件；订单服务只把它们当作缓存失效的
//! 提示信号，库存等数据始终以数据库为准。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ShopError;
use crate::kafka::ConsumerMessage;

/// 集中管理所有商品事件 topic 名称
pub mod topics {
    pub const PRODUCT_CREATED: &str = "product.created";
    pub const PRODUCT_UPDATED: &str = "product.updated";
    pub const PRODUCT_DELETED: &str = "product.deleted";

    pub const ALL: [&str; 3] = [PRODUCT_CREATED, PRODUCT_UPDATED, PRODUCT_DELETED];
}

/// 事件负载中的商品摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    /// 库存快照，仅供参考
    #[serde(alias = "stock", default)]
    pub stock_quantity: i32,
}

/// 商品事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProductEvent {
    Created(ProductSummary),
    Updated(ProductSummary),
    Deleted { product_id: i64 },
}

impl ProductEvent {
    /// 事件涉及的商品 ID
    pub fn product_id(&self) -> i64 {
        match self {
            Self::Created(summary) | Self::Updated(summary) => summary.id,
            Self::Deleted { product_id } => *product_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Deleted { .. } => "deleted",
        }
    }

    /// 按 topic 解码消息负载
    pub fn decode(topic: &str, payload: &[u8]) -> Result<Self, ShopError> {
        match topic {
            topics::PRODUCT_CREATED => Ok(Self::Created(serde_json::from_slice(payload)?)),
            topics::PRODUCT_UPDATED => Ok(Self::Updated(serde_json::from_slice(payload)?)),
            topics::PRODUCT_DELETED => Ok(Self::Deleted {
                product_id: decode_deleted_id(payload)?,
            }),
            other => Err(ShopError::Kafka(format!("未知的商品事件 topic: {other}"))),
        }
    }
}

impl TryFrom<&ConsumerMessage> for ProductEvent {
    type Error = ShopError;

    fn try_from(msg: &ConsumerMessage) -> Result<Self, Self::Error> {
        Self::decode(&msg.topic, &msg.payload)
    }
}

/// 删除事件的负载可以是裸 ID（`42` / `"42"`），也可以是商品摘要或 `{"id": 42}`
fn decode_deleted_id(payload: &[u8]) -> Result<i64, ShopError> {
    #[derive(Deserialize)]
    struct IdOnly {
        id: i64,
    }

    let raw = std::str::from_utf8(payload)
        .map_err(|e| ShopError::Kafka(format!("负载非 UTF-8 编码: {e}")))?
        .trim();

    if let Ok(id) = raw.trim_matches('"').parse::<i64>() {
        return Ok(id);
    }

    serde_json::from_str::<IdOnly>(raw)
        .map(|v| v.id)
        .map_err(|_| ShopError::Kafka(format!("无法解析被删除商品 ID: {raw}")))
}
