//! 订单仓储
//!
//! 下单与状态流转都在单个事务内完成：
//! - 下单：条件扣减每项库存、写入订单与明细，任一扣减未命中即整体回滚
//! - 流转：`SELECT .. FOR UPDATE` 锁定订单，校验状态机，取消时归还库存，再写状态

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use super::product_repo::PgProductRepository;
use super::traits::OrderRepositoryTrait;
use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order, OrderItem, OrderStatus};

pub struct PgOrderRepository {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    /// 限制当前事务内每条语句的执行时间
    async fn set_statement_timeout(tx: &mut PgConnection, timeout: Duration) -> Result<()> {
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(timeout.as_millis().to_string())
            .execute(tx)
            .await?;
        Ok(())
    }

    // ==================== 下单 ====================

    #[instrument(skip(self, order), fields(user_id = order.user_id, items = order.items.len()))]
    pub async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        Self::set_statement_timeout(&mut *tx, self.statement_timeout).await?;

        // 按商品 ID 顺序扣减，多商品订单之间不会互相死锁
        let mut decrements: Vec<_> = order.items.iter().collect();
        decrements.sort_by_key(|item| item.product_id);
        for item in decrements {
            let reserved =
                PgProductRepository::decrement_stock_in_tx(&mut *tx, item.product_id, item.quantity)
                    .await?;
            if !reserved {
                // tx 在此处被 drop，事务回滚
                return Err(OrderError::StockConflict {
                    product_id: item.product_id,
                });
            }
        }

        let mut created = Self::insert_order_in_tx(&mut *tx, order).await?;
        for item in &order.items {
            let row = OrderItem {
                order_id: created.id,
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            };
            Self::insert_item_in_tx(&mut *tx, &row).await?;
            created.items.push(row);
        }

        tx.commit().await?;
        debug!(order_id = created.id, "订单事务已提交");

        Ok(created)
    }

    async fn insert_order_in_tx(tx: &mut PgConnection, order: &NewOrder) -> Result<Order> {
        let created = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (user_id, status, total_amount)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, order_date, status, total_amount
            "#,
        )
        .bind(order.user_id)
        .bind(OrderStatus::Created)
        .bind(order.total_amount())
        .fetch_one(tx)
        .await?;

        Ok(created)
    }

    async fn insert_item_in_tx(tx: &mut PgConnection, item: &OrderItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .execute(tx)
        .await?;

        Ok(())
    }

    // ==================== 状态流转 ====================

    #[instrument(skip(self))]
    pub async fn transition_status(&self, order_id: i64, to: OrderStatus) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        Self::set_statement_timeout(&mut *tx, self.statement_timeout).await?;

        let mut order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, order_date, status, total_amount
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))?;

        // 行锁持有期间校验，重复取消在任何库存变更之前被拒绝
        order.status.check_transition(order_id, to)?;

        order.items = Self::list_items_in_tx(&mut *tx, order_id).await?;

        if to == OrderStatus::Cancelled {
            for item in &order.items {
                let restocked =
                    PgProductRepository::increment_stock_in_tx(&mut *tx, item.product_id, item.quantity)
                        .await?;
                if !restocked {
                    debug!(product_id = item.product_id, "商品已删除，跳过库存归还");
                }
            }
        }

        sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(order_id)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        order.status = to;

        Ok(order)
    }

    async fn list_items_in_tx(tx: &mut PgConnection, order_id: i64) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT order_id, product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY product_id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(tx)
        .await?;

        Ok(items)
    }

    // ==================== 查询 ====================

    pub async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;

        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, order_date, status, total_amount
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(mut order) = order else {
            return Ok(None);
        };
        order.items = Self::list_items_in_tx(&mut *conn, id).await?;

        Ok(Some(order))
    }

    pub async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let mut orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, order_date, status, total_amount
            FROM orders
            WHERE user_id = $1
            ORDER BY order_date DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT order_id, product_id, quantity, unit_price
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, product_id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for item in items {
            by_order.entry(item.order_id).or_default().push(item);
        }
        for order in &mut orders {
            order.items = by_order.remove(&order.id).unwrap_or_default();
        }

        Ok(orders)
    }
}

#[async_trait]
impl OrderRepositoryTrait for PgOrderRepository {
    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        self.create_order(order).await
    }

    async fn transition_status(&self, order_id: i64, to: OrderStatus) -> Result<Order> {
        self.transition_status(order_id, to).await
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        self.get_order(id).await
    }

    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.list_orders_by_user(user_id).await
    }
}
