//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，便于替换存储和 mock 测试

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewOrder, Order, OrderStatus, Product};

/// 库存仓储接口（商品目录的只读视图 + 条件库存调整）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepositoryTrait: Send + Sync {
    async fn get_product(&self, id: i64) -> Result<Option<Product>>;
    async fn get_products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>>;
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// 商品不存在时返回 None
    async fn get_stock(&self, id: i64) -> Result<Option<i32>>;

    /// 条件调整库存
    ///
    /// 只有调整后库存不小于 0 时才生效，返回是否生效
    async fn adjust_stock(&self, product_id: i64, delta: i32) -> Result<bool>;
}

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 在一个事务中写入订单、明细并逐项条件扣减库存
    ///
    /// 任一扣减未命中返回 `StockConflict`，整个事务回滚
    async fn create_order(&self, order: &NewOrder) -> Result<Order>;

    /// 在一个事务中锁定订单、校验状态机、取消时归还库存并写入新状态
    ///
    /// 返回流转后的订单（含明细）
    async fn transition_status(&self, order_id: i64, to: OrderStatus) -> Result<Order>;

    /// 获取订单（含明细）
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;

    /// 用户的全部订单（含明细），按下单时间倒序
    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>>;
}
