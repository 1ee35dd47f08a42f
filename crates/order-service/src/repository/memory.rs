//! 内存存储
//!
//! 同时实现库存仓储和订单仓储，所有状态放在同一把锁后面，
//! 每个操作在持锁期间完整执行，相当于一个串行化事务。
//! 适用于测试和本地开发；可注入写延迟和写失败来模拟慢事务与存储故障。

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::traits::{OrderRepositoryTrait, ProductRepositoryTrait};
use crate::error::{OrderError, Result};
use crate::models::{NewOrder, Order, OrderItem, OrderStatus, Product};

#[derive(Debug, Default)]
struct State {
    products: BTreeMap<i64, Product>,
    orders: BTreeMap<i64, Order>,
    next_order_id: i64,
    write_delay: Option<Duration>,
    fail_writes: bool,
}

/// 内存存储
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let state = State {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
            ..State::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// 插入或覆盖商品（模拟目录服务的写入）
    pub async fn upsert_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// 删除商品（模拟目录服务的删除）
    pub async fn remove_product(&self, id: i64) -> Option<Product> {
        self.state.lock().await.products.remove(&id)
    }

    pub async fn stock_of(&self, id: i64) -> Option<i32> {
        self.state
            .lock()
            .await
            .products
            .get(&id)
            .map(|p| p.stock_quantity)
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// 每次写操作在持锁期间额外等待，模拟慢事务
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.write_delay = delay;
    }

    /// 让后续写操作失败，模拟存储不可用
    pub async fn set_fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    async fn before_write(state: &State) -> Result<()> {
        if let Some(delay) = state.write_delay {
            tokio::time::sleep(delay).await;
        }
        if state.fail_writes {
            return Err(OrderError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepositoryTrait for InMemoryStore {
    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn get_products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<Product> = ids
            .iter()
            .filter_map(|id| state.products.get(id).cloned())
            .collect();
        products.sort_by_key(|p| p.id);
        products.dedup_by_key(|p| p.id);
        Ok(products)
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.state.lock().await.products.values().cloned().collect())
    }

    async fn get_stock(&self, id: i64) -> Result<Option<i32>> {
        Ok(self
            .state
            .lock()
            .await
            .products
            .get(&id)
            .map(|p| p.stock_quantity))
    }

    async fn adjust_stock(&self, product_id: i64, delta: i32) -> Result<bool> {
        let mut state = self.state.lock().await;
        Self::before_write(&state).await?;

        match state.products.get_mut(&product_id) {
            Some(product) if product.stock_quantity + delta >= 0 => {
                product.stock_quantity += delta;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl OrderRepositoryTrait for InMemoryStore {
    async fn create_order(&self, order: &NewOrder) -> Result<Order> {
        let mut state = self.state.lock().await;
        Self::before_write(&state).await?;

        // 先在副本上扣减，全部命中后再一次性写回
        let mut reserved: HashMap<i64, i32> = HashMap::new();
        for item in &order.items {
            let current = match reserved.get(&item.product_id) {
                Some(stock) => *stock,
                None => match state.products.get(&item.product_id) {
                    Some(product) => product.stock_quantity,
                    None => {
                        return Err(OrderError::StockConflict {
                            product_id: item.product_id,
                        });
                    }
                },
            };
            if current < item.quantity {
                return Err(OrderError::StockConflict {
                    product_id: item.product_id,
                });
            }
            reserved.insert(item.product_id, current - item.quantity);
        }

        for (product_id, stock) in reserved {
            if let Some(product) = state.products.get_mut(&product_id) {
                product.stock_quantity = stock;
            }
        }

        state.next_order_id += 1;
        let id = state.next_order_id;
        let created = Order {
            id,
            user_id: order.user_id,
            order_date: Utc::now(),
            status: OrderStatus::Created,
            total_amount: order.total_amount(),
            items: order
                .items
                .iter()
                .map(|item| OrderItem {
                    order_id: id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        };
        state.orders.insert(id, created.clone());

        Ok(created)
    }

    async fn transition_status(&self, order_id: i64, to: OrderStatus) -> Result<Order> {
        let mut state = self.state.lock().await;

        let current = state
            .orders
            .get(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;
        current.status.check_transition(order_id, to)?;
        Self::before_write(&state).await?;

        let mut order = current.clone();
        if to == OrderStatus::Cancelled {
            for item in &order.items {
                if let Some(product) = state.products.get_mut(&item.product_id) {
                    product.stock_quantity += item.quantity;
                }
            }
        }
        order.status = to;
        state.orders.insert(order_id, order.clone());

        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.order_date.cmp(&a.order_date).then(b.id.cmp(&a.id)));
        Ok(orders)
    }
}
