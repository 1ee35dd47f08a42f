//! 订单相关实体定义
//!
//! 包含订单、订单明细、下单载荷以及带商品信息的订单详情视图

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::OrderStatus;

/// 已认证的调用方身份
///
/// 由认证服务校验签名与有效期后传入，订单服务只做归属与角色判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    /// 管理员或资源归属者可访问
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    /// 下单时按快照价计算，不接受客户端传入
    pub total_amount: Decimal,
    #[sqlx(skip)]
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

/// 订单明细，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i32,
    /// 下单时的商品单价
    pub unit_price: Decimal,
}

/// 交给订单存储的下单载荷（已校验，单价已快照）
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub user_id: i64,
    pub items: Vec<NewOrderItem>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl NewOrder {
    /// 订单总额 Σ unit_price × quantity
    pub fn total_amount(&self) -> Decimal {
        self.items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum()
    }
}

/// 订单详情（订单 + 每条明细对应的商品摘要）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: i64,
    pub user_id: i64,
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub items: Vec<OrderItemDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemDetail {
    pub product_id: i64,
    /// 商品已从目录删除时为 None
    pub product: Option<OrderedProduct>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

/// 订单详情中展示的商品目录信息
///
/// 不含库存：订单详情缓存不随下单失效。名称、当前价与删除状态
/// 在订单详情缓存的 TTL 内可能滞后于目录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedProduct {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
}

// ==================== 请求 ====================

/// 下单请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub line_items: Vec<LineItemRequest>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub product_id: i64,
    pub quantity: i32,
}

impl PlaceOrderRequest {
    pub fn new(line_items: impl IntoIterator<Item = (i64, i32)>) -> Self {
        Self {
            line_items: line_items
                .into_iter()
                .map(|(product_id, quantity)| LineItemRequest {
                    product_id,
                    quantity,
                })
                .collect(),
        }
    }
}

/// 状态更新请求（仅管理员）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_amount() {
        let order = NewOrder {
            user_id: 1,
            items: vec![
                NewOrderItem {
                    product_id: 1,
                    quantity: 2,
                    unit_price: Decimal::new(1050, 2),
                },
                NewOrderItem {
                    product_id: 2,
                    quantity: 3,
                    unit_price: Decimal::new(199, 2),
                },
            ],
        };
        // 2 × 10.50 + 3 × 1.99
        assert_eq!(order.total_amount(), Decimal::new(2697, 2));
    }

    #[test]
    fn test_caller_access() {
        assert!(Caller::user(1).can_access(1));
        assert!(!Caller::user(1).can_access(2));
        assert!(Caller::admin(9).can_access(2));
    }

    #[test]
    fn test_request_deserialize() {
        let req: PlaceOrderRequest =
            serde_json::from_str(r#"{"line_items":[{"product_id":3,"quantity":2}]}"#).unwrap();
        assert_eq!(req.line_items.len(), 1);
        assert_eq!(req.line_items[0].product_id, 3);
    }
}
