//! 订单服务错误类型
//!
//! 定义下单、查询和状态流转中的业务错误与系统错误。
//! 业务错误同步返回给调用方且不重试；系统错误中只有超时和数据库错误可重试。

use shop_shared::error::ShopError;
use thiserror::Error;

use crate::models::OrderStatus;

/// 订单服务错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // === 输入校验 ===
    #[error("参数校验失败: {0}")]
    Validation(String),

    // === 资源不存在 ===
    #[error("商品不存在: {0}")]
    ProductNotFound(i64),

    #[error("订单不存在: {0}")]
    OrderNotFound(i64),

    #[error("用户没有任何订单: user_id={0}")]
    UserOrdersNotFound(i64),

    // === 库存 ===
    #[error("商品已售罄: product_id={product_id}")]
    OutOfStock { product_id: i64 },

    #[error("商品库存不足: product_id={product_id}, 需要 {requested}, 可用 {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i32,
        available: i32,
    },

    /// 事务内条件扣减未命中（被并发订单抢先），仅在服务内部使用
    #[error("库存扣减冲突: product_id={product_id}")]
    StockConflict { product_id: i64 },

    // === 权限 ===
    #[error("权限不足: {operation}")]
    Forbidden { operation: String },

    // === 状态流转 ===
    #[error("订单已取消: order_id={0}")]
    AlreadyCancelled(i64),

    #[error("订单状态不允许此操作: order_id={order_id}, {from} -> {to}")]
    InvalidTransition {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
    },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 订单服务 Result 类型别名
pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout { .. })
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Timeout { .. }
                | Self::Cache(_)
                | Self::Serialization(_)
                | Self::Internal(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProductNotFound(_) | Self::OrderNotFound(_) | Self::UserOrdersNotFound(_)
        )
    }

    /// 获取错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::OrderNotFound(_) | Self::UserOrdersNotFound(_) => "ORDER_NOT_FOUND",
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::StockConflict { .. } => "STOCK_CONFLICT",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::AlreadyCancelled(_) => "ALREADY_CANCELLED",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::Database(_) => "PERSISTENCE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Cache(_) => "CACHE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub(crate) fn forbidden(operation: impl Into<String>) -> Self {
        Self::Forbidden {
            operation: operation.into(),
        }
    }
}

impl From<ShopError> for OrderError {
    fn from(err: ShopError) -> Self {
        match err {
            ShopError::Database(e) => Self::Database(e),
            ShopError::Timeout { operation } => Self::Timeout { operation },
            ShopError::Serialization(e) => Self::Serialization(e),
            ShopError::Redis(e) => Self::Cache(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
