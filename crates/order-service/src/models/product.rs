//! 商品实体

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderedProduct;

/// 商品
///
/// 目录由外部服务维护，订单服务只读取商品并增减库存
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[sqlx(default)]
    pub description: Option<String>,
    /// 当前目录价，下单时快照到订单明细
    pub price: Decimal,
    /// 库存，数据库约束保证不小于 0
    pub stock_quantity: i32,
}

impl Product {
    /// 检查库存是否满足请求数量
    pub fn has_stock(&self, quantity: i32) -> bool {
        self.stock_quantity >= quantity
    }

    /// 订单详情中引用的目录信息
    pub fn ordered(&self) -> OrderedProduct {
        OrderedProduct {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_stock() {
        let product = Product {
            id: 1,
            name: "Keyboard".to_string(),
            description: None,
            price: Decimal::new(4990, 2),
            stock_quantity: 3,
        };
        assert!(product.has_stock(3));
        assert!(!product.has_stock(4));
    }

    #[test]
    fn test_ordered_view_omits_stock() {
        let product = Product {
            id: 2,
            name: "Mouse".to_string(),
            description: Some("wireless".to_string()),
            price: Decimal::new(1999, 2),
            stock_quantity: 10,
        };
        let ordered = product.ordered();
        assert_eq!(ordered.price.to_string(), "19.99");

        let json = serde_json::to_value(&ordered).unwrap();
        assert!(json.get("stock_quantity").is_none());
        assert_eq!(json["name"], "Mouse");
    }
}
