//! 库存仓储
//!
//! 商品读取与条件库存调整。扣减总是表达为一条带前置条件的 UPDATE，
//! 由数据库在写入时保证库存不会小于 0。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use super::traits::ProductRepositoryTrait;
use crate::error::Result;
use crate::models::Product;

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 获取单个商品
    pub async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, description, price, stock_quantity
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    /// 批量获取商品，不存在的 ID 被忽略
    pub async fn get_products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, description, price, stock_quantity
            FROM products
            WHERE id = ANY($1)
            ORDER BY id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, description, price, stock_quantity
            FROM products
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }

    pub async fn get_stock(&self, id: i64) -> Result<Option<i32>> {
        let stock: Option<i32> =
            sqlx::query_scalar("SELECT stock_quantity FROM products WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(stock)
    }

    /// 条件调整库存，调整后库存小于 0 时不生效
    #[instrument(skip(self))]
    pub async fn adjust_stock(&self, product_id: i64, delta: i32) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::adjust_stock_in_tx(&mut *conn, product_id, delta).await
    }

    /// 在事务中条件调整库存
    pub async fn adjust_stock_in_tx(
        tx: &mut PgConnection,
        product_id: i64,
        delta: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2
            WHERE id = $1 AND stock_quantity + $2 >= 0
            "#,
        )
        .bind(product_id)
        .bind(delta)
        .execute(tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 在事务中条件扣减库存
    ///
    /// 返回 false 表示库存已被并发订单抢先扣减（或商品不存在）
    pub async fn decrement_stock_in_tx(
        tx: &mut PgConnection,
        product_id: i64,
        quantity: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2
            WHERE id = $1 AND stock_quantity >= $2
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 在事务中归还库存（取消订单的补偿动作）
    ///
    /// 商品已从目录删除时影响 0 行，返回 false
    pub async fn increment_stock_in_tx(
        tx: &mut PgConnection,
        product_id: i64,
        quantity: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .bind(quantity)
        .execute(tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ProductRepositoryTrait for PgProductRepository {
    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        self.get_product(id).await
    }

    async fn get_products_by_ids(&self, ids: &[i64]) -> Result<Vec<Product>> {
        self.get_products_by_ids(ids).await
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        self.list_products().await
    }

    async fn get_stock(&self, id: i64) -> Result<Option<i32>> {
        self.get_stock(id).await
    }

    async fn adjust_stock(&self, product_id: i64, delta: i32) -> Result<bool> {
        self.adjust_stock(product_id, delta).await
    }
}
