//! 订单与商品查询服务
//!
//! 只读查询，采用读穿透缓存。
//!
//! ## 缓存策略
//!
//! - 订单详情 `order:<id>`：TTL 见 `order_ttl`
//! - 用户订单列表 `user:<id>:orders`：TTL 见 `order_ttl`
//! - 商品 `product:<id>` 与商品列表 `product:all`：TTL 见 `product_ttl`
//! - 库存：始终读存储，不走缓存
//!
//! 缓存键在用户之间共享，权限每次都针对物化后的结果重新校验。

use std::collections::HashMap;
use std::sync::Arc;

use shop_shared::cache::CacheKey;
use shop_shared::timeout::with_timeout;
use tracing::instrument;

use super::cache::ReadThroughCache;
use super::order_service::OrderServiceConfig;
use crate::error::{OrderError, Result};
use crate::models::{Caller, Order, OrderDetail, OrderItemDetail, Product};
use crate::repository::{OrderRepositoryTrait, ProductRepositoryTrait};

pub struct QueryService<P, O>
where
    P: ProductRepositoryTrait,
    O: OrderRepositoryTrait,
{
    products: Arc<P>,
    orders: Arc<O>,
    cache: ReadThroughCache,
    config: OrderServiceConfig,
}

impl<P, O> QueryService<P, O>
where
    P: ProductRepositoryTrait,
    O: OrderRepositoryTrait,
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

    /// 获取订单详情
    ///
    /// 无论结果来自缓存还是存储，都校验调用方是管理员或订单归属者
    #[instrument(skip(self, caller), fields(caller_id = caller.user_id))]
    pub async fn get_order(&self, caller: Caller, order_id: i64) -> Result<OrderDetail> {
        let detail = self
            .cache
            .get_or_load(&CacheKey::order(order_id), self.config.order_ttl, || {
                self.load_order_detail(order_id)
            })
            .await?;

        if !caller.can_access(detail.user_id) {
            return Err(OrderError::forbidden("order.read"));
        }

        Ok(detail)
    }

    async fn load_order_detail(&self, order_id: i64) -> Result<OrderDetail> {
        let order = with_timeout(
            self.config.store_timeout,
            "order.get",
            self.orders.get_order(order_id),
        )
        .await?
        .ok_or(OrderError::OrderNotFound(order_id))?;

        let ids: Vec<i64> = order.items.iter().map(|item| item.product_id).collect();
        let products: HashMap<i64, Product> = with_timeout(
            self.config.store_timeout,
            "product.get_batch",
            self.products.get_products_by_ids(&ids),
        )
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

        let items = order
            .items
            .iter()
            .map(|item| OrderItemDetail {
                product_id: item.product_id,
                product: products.get(&item.product_id).map(Product::ordered),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        Ok(OrderDetail {
            id: order.id,
            user_id: order.user_id,
            order_date: order.order_date,
            status: order.status,
            total_amount: order.total_amount,
            items,
        })
    }

    /// 获取用户的订单列表
    ///
    /// 权限在读取缓存之前校验；用户没有任何订单时返回 `UserOrdersNotFound`，空结果不回填缓存
    #[instrument(skip(self, caller), fields(caller_id = caller.user_id))]
    pub async fn get_user_orders(&self, caller: Caller, user_id: i64) -> Result<Vec<Order>> {
        if !caller.can_access(user_id) {
            return Err(OrderError::forbidden("order.list"));
        }

        let orders = self
            .cache
            .get_or_load(
                &CacheKey::user_orders(user_id),
                self.config.order_ttl,
                || async move {
                    let orders = with_timeout(
                        self.config.store_timeout,
                        "order.list_by_user",
                        self.orders.list_orders_by_user(user_id),
                    )
                    .await?;
                    if orders.is_empty() {
                        return Err(OrderError::UserOrdersNotFound(user_id));
                    }
                    Ok(orders)
                },
            )
            .await?;

        // 缓存键按用户划分，这里再按归属过滤一次
        let orders: Vec<Order> = orders.into_iter().filter(|o| o.user_id == user_id).collect();
        if orders.is_empty() {
            return Err(OrderError::UserOrdersNotFound(user_id));
        }
        Ok(orders)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i64) -> Result<Product> {
        self.cache
            .get_or_load(
                &CacheKey::product(product_id),
                self.config.product_ttl,
                || async move {
                    with_timeout(
                        self.config.store_timeout,
                        "product.get",
                        self.products.get_product(product_id),
                    )
                    .await?
                    .ok_or(OrderError::ProductNotFound(product_id))
                },
            )
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.cache
            .get_or_load(&CacheKey::all_products(), self.config.product_ttl, || {
                with_timeout(
                    self.config.store_timeout,
                    "product.list",
                    self.products.list_products(),
                )
            })
            .await
    }

    /// 当前库存，始终读存储
    #[instrument(skip(self))]
    pub async fn get_product_stock(&self, product_id: i64) -> Result<i32> {
        with_timeout(
            self.config.store_timeout,
            "product.get_stock",
            self.products.get_stock(product_id),
        )
        .await?
        .ok_or(OrderError::ProductNotFound(product_id))
    }
}
