//! 订单编排服务
//!
//! 负责下单与状态流转两条写路径：
//! - 下单：参数校验 -> 库存与价格预检 -> 事务内条件扣减并写入订单 -> 缓存失效
//! - 流转：权限校验 -> 目标状态校验 -> 事务内锁单、校验状态机、取消时归还库存 -> 缓存失效
//!
//! 存储事务在独立任务中执行，调用方中途放弃不会打断事务，事务要么完整提交要么回滚；
//! 调用方只在存储超时内等待结果，缓存失效也在该任务内完成。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use shop_shared::cache::CacheKey;
use shop_shared::config::OrderConfig;
use shop_shared::observability::metrics as shop_metrics;
use shop_shared::timeout::with_timeout;
use tracing::{info, instrument, warn};

use super::cache::ReadThroughCache;
use crate::error::{OrderError, Result};
use crate::models::{
    Caller, LineItemRequest, NewOrder, NewOrderItem, Order, OrderStatus, PlaceOrderRequest,
    Product,
};
use crate::repository::{OrderRepositoryTrait, ProductRepositoryTrait};

/// `orders.total_amount NUMERIC(12,2)` 能容纳的最大总额
fn max_order_total() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// 服务层超时与缓存 TTL
#[derive(Debug, Clone)]
pub struct OrderServiceConfig {
    pub product_ttl: Duration,
    pub order_ttl: Duration,
    pub store_timeout: Duration,
}

impl Default for OrderServiceConfig {
    fn default() -> Self {
        Self::from(&OrderConfig::default())
    }
}

impl From<&OrderConfig> for OrderServiceConfig {
    fn from(config: &OrderConfig) -> Self {
        Self {
            product_ttl: config.product_ttl(),
            order_ttl: config.order_ttl(),
            store_timeout: config.store_timeout(),
        }
    }
}

/// 订单编排服务
///
/// 存储与缓存在构造时注入，不依赖任何全局状态
pub struct OrderService<P, O>
where
    P: ProductRepositoryTrait,
    O: OrderRepositoryTrait,
{
    products: Arc<P>,
    orders: Arc<O>,
    cache: ReadThroughCache,
    config: OrderServiceConfig,
}

impl<P, O> OrderService<P, O>
where
    P: ProductRepositoryTrait + 'static,
    O: OrderRepositoryTrait + 'static,
{
    pub fn new(
        products: Arc<P>,
        orders: Arc<O>,
        cache: ReadThroughCache,
        config: OrderServiceConfig,
    ) -> Self {
        Self {
            products,
            orders,
            cache,
            config,
        }
    }

    /// 下单
    ///
    /// 1. 校验明细（非空、数量为正、商品不重复）
    /// 2. 预检每个商品的库存并快照单价
    /// 3. 事务内条件扣减库存并写入订单与明细
    /// 4. 扣减竞争失败时复查一次库存，以库存不足返回
    #[instrument(
        skip(self, caller, request),
        fields(user_id = caller.user_id, items = request.line_items.len())
    )]
    pub async fn place_order(&self, caller: Caller, request: PlaceOrderRequest) -> Result<Order> {
        let started = Instant::now();
        let result = self.place_order_inner(caller, request).await;

        shop_metrics::record_order_placement(
            result.as_ref().err().map(OrderError::error_code),
            started.elapsed().as_secs_f64(),
        );

        match &result {
            Ok(order) => info!(
                order_id = order.id,
                total_amount = %order.total_amount,
                "订单创建成功"
            ),
            Err(e) if e.is_business_error() => info!(error = %e, "下单被拒绝"),
            Err(e) => warn!(error = %e, "下单失败"),
        }

        result
    }

    async fn place_order_inner(&self, caller: Caller, request: PlaceOrderRequest) -> Result<Order> {
        let line_items = validate_line_items(request.line_items)?;

        // 预检：库存不足直接拒绝，不进入事务
        let ids: Vec<i64> = line_items.iter().map(|item| item.product_id).collect();
        let products = with_timeout(
            self.config.store_timeout,
            "product.get_batch",
            self.products.get_products_by_ids(&ids),
        )
        .await?;
        let catalog: HashMap<i64, Product> = products.into_iter().map(|p| (p.id, p)).collect();

        let mut items = Vec::with_capacity(line_items.len());
        for line in &line_items {
            let product = catalog
                .get(&line.product_id)
                .ok_or(OrderError::ProductNotFound(line.product_id))?;
            check_stock(product, line.quantity)?;
            items.push(NewOrderItem {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: product.price,
            });
        }

        let new_order = NewOrder {
            user_id: caller.user_id,
            items,
        };
        check_total(&new_order)?;

        let orders = Arc::clone(&self.orders);
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let order = orders.create_order(&new_order).await?;
            invalidate_after_placement(&cache, &order).await;
            Ok::<_, OrderError>(order)
        });

        let outcome = with_timeout(self.config.store_timeout, "order.create", async move {
            task.await
                .map_err(|e| OrderError::Internal(format!("下单任务异常退出: {e}")))?
        })
        .await;

        match outcome {
            Err(OrderError::StockConflict { product_id }) => {
                shop_metrics::record_stock_conflict();
                let requested = line_items
                    .iter()
                    .find(|item| item.product_id == product_id)
                    .map_or(0, |item| item.quantity);
                Err(self.recheck_stock(product_id, requested).await)
            }
            other => other,
        }
    }

    /// 扣减竞争失败后复查一次库存，不重试
    ///
    /// 商品在预检之后被删除时返回 `ProductNotFound`
    async fn recheck_stock(&self, product_id: i64, requested: i32) -> OrderError {
        let available = match with_timeout(
            self.config.store_timeout,
            "product.get_stock",
            self.products.get_stock(product_id),
        )
        .await
        {
            Ok(Some(stock)) => stock,
            Ok(None) => {
                info!(product_id, "商品在下单过程中被删除");
                return OrderError::ProductNotFound(product_id);
            }
            Err(e) => {
                warn!(product_id, error = %e, "库存复查失败");
                0
            }
        };

        info!(product_id, requested, available, "库存被并发订单抢先扣减");
        OrderError::InsufficientStock {
            product_id,
            requested,
            available,
        }
    }

    /// 订单状态流转（仅管理员）
    ///
    /// 权限与目标状态在任何存储调用之前校验；取消时的库存归还与状态写入在同一事务内
    #[instrument(skip(self, caller), fields(admin_id = caller.user_id))]
    pub async fn transition_status(
        &self,
        caller: Caller,
        order_id: i64,
        status: &str,
    ) -> Result<Order> {
        if !caller.is_admin {
            return Err(OrderError::forbidden("order.update_status"));
        }
        let to = OrderStatus::parse_target(status)?;

        let orders = Arc::clone(&self.orders);
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let order = orders.transition_status(order_id, to).await?;
            invalidate_after_transition(&cache, &order).await;
            Ok::<_, OrderError>(order)
        });

        let result = with_timeout(self.config.store_timeout, "order.transition", async move {
            task.await
                .map_err(|e| OrderError::Internal(format!("状态流转任务异常退出: {e}")))?
        })
        .await;

        match &result {
            Ok(order) => {
                shop_metrics::record_order_transition(to.as_str(), "ok");
                info!(order_id, status = %order.status, "订单状态已更新");
            }
            Err(e) => {
                shop_metrics::record_order_transition(to.as_str(), e.error_code());
                info!(order_id, error = %e, "订单状态更新失败");
            }
        }

        result
    }
}

/// 校验下单明细
fn validate_line_items(line_items: Vec<LineItemRequest>) -> Result<Vec<LineItemRequest>> {
    if line_items.is_empty() {
        return Err(OrderError::Validation("订单至少包含一个商品".to_string()));
    }

    let mut seen = HashSet::with_capacity(line_items.len());
    for item in &line_items {
        if item.quantity <= 0 {
            return Err(OrderError::Validation(format!(
                "商品 {} 的数量必须大于 0",
                item.product_id
            )));
        }
        if !seen.insert(item.product_id) {
            return Err(OrderError::Validation(format!(
                "商品 {} 在订单中重复出现",
                item.product_id
            )));
        }
    }

    Ok(line_items)
}

fn check_stock(product: &Product, quantity: i32) -> Result<()> {
    if product.stock_quantity <= 0 {
        return Err(OrderError::OutOfStock {
            product_id: product.id,
        });
    }
    if !product.has_stock(quantity) {
        return Err(OrderError::InsufficientStock {
            product_id: product.id,
            requested: quantity,
            available: product.stock_quantity,
        });
    }
    Ok(())
}

/// 总额超出存储精度时拒绝，避免提交时才以不可重试的数值溢出失败
fn check_total(order: &NewOrder) -> Result<()> {
    let total = order.total_amount();
    if total > max_order_total() {
        return Err(OrderError::Validation(format!(
            "订单总额 {total} 超出上限 {}",
            max_order_total()
        )));
    }
    Ok(())
}

async fn invalidate_after_placement(cache: &ReadThroughCache, order: &Order) {
    let mut keys: Vec<String> = order
        .items
        .iter()
        .map(|item| CacheKey::product(item.product_id))
        .collect();
    keys.push(CacheKey::all_products());
    keys.push(CacheKey::user_orders(order.user_id));
    cache.invalidate_all(keys).await;
}

async fn invalidate_after_transition(cache: &ReadThroughCache, order: &Order) {
    let mut keys = vec![CacheKey::order(order.id), CacheKey::user_orders(order.user_id)];
    if order.status == OrderStatus::Cancelled {
        keys.extend(
            order
                .items
                .iter()
                .map(|item| CacheKey::product(item.product_id)),
        );
        keys.push(CacheKey::all_products());
    }
    cache.invalidate_all(keys).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderItem;
    use crate::repository::{MockOrderRepositoryTrait, MockProductRepositoryTrait};
    use chrono::Utc;

    fn product(id: i64, price_cents: i64, stock: i32) -> Product {
        Product {
            id,
            name: format!("product-{id}"),
            description: None,
            price: Decimal::new(price_cents, 2),
            stock_quantity: stock,
        }
    }

    fn order_from(new_order: &NewOrder, id: i64) -> Order {
        Order {
            id,
            user_id: new_order.user_id,
            order_date: Utc::now(),
            status: OrderStatus::Created,
            total_amount: new_order.total_amount(),
            items: new_order
                .items
                .iter()
                .map(|item| OrderItem {
                    order_id: id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        }
    }

    fn service(
        products: MockProductRepositoryTrait,
        orders: MockOrderRepositoryTrait,
    ) -> OrderService<MockProductRepositoryTrait, MockOrderRepositoryTrait> {
        OrderService::new(
            Arc::new(products),
            Arc::new(orders),
            ReadThroughCache::disabled(),
            OrderServiceConfig::default(),
        )
    }

    fn catalog(products: Vec<Product>) -> MockProductRepositoryTrait {
        let mut repo = MockProductRepositoryTrait::new();
        repo.expect_get_products_by_ids().returning(move |ids| {
            Ok(products
                .iter()
                .filter(|p| ids.contains(&p.id))
                .cloned()
                .collect())
        });
        repo
    }

    #[tokio::test]
    async fn test_place_order_snapshots_price_and_total() {
        let products = catalog(vec![product(1, 1050, 10), product(2, 199, 10)]);
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_create_order()
            .withf(|o| o.user_id == 7 && o.items.len() == 2)
            .times(1)
            .returning(|o| Ok(order_from(o, 100)));

        let order = service(products, orders)
            .place_order(Caller::user(7), PlaceOrderRequest::new([(1, 2), (2, 3)]))
            .await
            .unwrap();

        assert_eq!(order.id, 100);
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.total_amount, Decimal::new(2697, 2));
        assert_eq!(order.items[0].unit_price, Decimal::new(1050, 2));
    }

    #[tokio::test]
    async fn test_place_order_validation() {
        let svc = service(
            MockProductRepositoryTrait::new(),
            MockOrderRepositoryTrait::new(),
        );

        for request in [
            PlaceOrderRequest::default(),
            PlaceOrderRequest::new([(1, 0)]),
            PlaceOrderRequest::new([(1, -2)]),
            PlaceOrderRequest::new([(1, 1), (1, 2)]),
        ] {
            let err = svc.place_order(Caller::user(1), request).await.unwrap_err();
            assert!(matches!(err, OrderError::Validation(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn test_place_order_precheck_rejects_without_transaction() {
        let products = catalog(vec![product(1, 100, 2), product(2, 100, 0)]);
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_create_order().times(0);
        let svc = service(products, orders);

        let err = svc
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 3)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::InsufficientStock {
                product_id: 1,
                requested: 3,
                available: 2
            }
        ));

        let err = svc
            .place_order(Caller::user(1), PlaceOrderRequest::new([(2, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::OutOfStock { product_id: 2 }));

        let err = svc
            .place_order(Caller::user(1), PlaceOrderRequest::new([(3, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::ProductNotFound(3)));
    }

    #[tokio::test]
    async fn test_lost_race_rechecks_stock_once() {
        let mut products = catalog(vec![product(1, 100, 5)]);
        products
            .expect_get_stock()
            .withf(|id| *id == 1)
            .times(1)
            .returning(|_| Ok(Some(2)));
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|_| Err(OrderError::StockConflict { product_id: 1 }));

        let err = service(products, orders)
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 3)]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrderError::InsufficientStock {
                product_id: 1,
                requested: 3,
                available: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_product_deleted_during_placement_is_not_found() {
        let mut products = catalog(vec![product(1, 100, 5)]);
        products.expect_get_stock().times(1).returning(|_| Ok(None));
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_create_order()
            .returning(|_| Err(OrderError::StockConflict { product_id: 1 }));

        let err = service(products, orders)
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 3)]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrderError::ProductNotFound(1)));
    }

    #[tokio::test]
    async fn test_total_beyond_storage_precision_is_rejected() {
        // 99,999,999.99 × 101 超出 NUMERIC(12,2)
        let products = catalog(vec![product(1, 9_999_999_999, 1_000)]);
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_create_order().times(0);
        let svc = service(products, orders);

        let err = svc
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 101)]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Validation(_)), "{err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_total_at_storage_limit_is_accepted() {
        // 99,999,999.99 × 100 = 9,999,999,999.00
        let products = catalog(vec![product(1, 9_999_999_999, 1_000)]);
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|o| Ok(order_from(o, 1)));

        let order = service(products, orders)
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 100)]))
            .await
            .unwrap();
        assert_eq!(order.total_amount, Decimal::new(999_999_999_900, 2));
    }

    #[tokio::test]
    async fn test_store_failure_is_retryable() {
        let products = catalog(vec![product(1, 100, 5)]);
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_create_order()
            .returning(|_| Err(OrderError::Database(sqlx::Error::PoolTimedOut)));

        let err = service(products, orders)
            .place_order(Caller::user(1), PlaceOrderRequest::new([(1, 1)]))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
    }

    #[tokio::test]
    async fn test_non_admin_transition_never_touches_store() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_transition_status().times(0);
        let svc = service(MockProductRepositoryTrait::new(), orders);

        let err = svc
            .transition_status(Caller::user(1), 10, "cancelled")
            .await
            .unwrap_err();
        assert!(matches!(err, OrderError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_unknown_target_status_is_validation_error() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders.expect_transition_status().times(0);
        let svc = service(MockProductRepositoryTrait::new(), orders);

        for status in ["shipped", "created", ""] {
            let err = svc
                .transition_status(Caller::admin(1), 10, status)
                .await
                .unwrap_err();
            assert!(matches!(err, OrderError::Validation(_)), "{status}");
        }
    }

    #[tokio::test]
    async fn test_admin_transition_passes_parsed_status() {
        let mut orders = MockOrderRepositoryTrait::new();
        orders
            .expect_transition_status()
            .withf(|id, to| *id == 10 && *to == OrderStatus::Processing)
            .times(1)
            .returning(|id, to| {
                Ok(Order {
                    id,
                    user_id: 3,
                    order_date: Utc::now(),
                    status: to,
                    total_amount: Decimal::ZERO,
                    items: Vec::new(),
                })
            });

        let order = service(MockProductRepositoryTrait::new(), orders)
            .transition_status(Caller::admin(1), 10, "Processing")
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Processing);
    }
}
