//! 订单服务
//!
//! 订单生命周期与库存一致性引擎：在共享的有限库存上下单，保持读缓存与数据库一致，
//! 并保证订单状态流转（含取消时的库存归还）的原子性。
//!
//! ## 核心功能
//!
//! - **下单**：库存预检、事务内条件扣减、订单与明细原子写入，杜绝超卖
//! - **查询**：订单详情、用户订单、商品与库存，读穿透缓存，每次读取都校验权限
//! - **状态流转**：created -> processing -> delivered，可在终态前取消并归还库存
//! - **商品事件**：消费商品生命周期事件，失效相关缓存
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据库仓储层与内存存储
//! - `service`: 业务服务层与缓存协调
//! - `consumer`: 商品事件消费者

pub mod consumer;
pub mod error;
pub mod models;
pub mod repository;
pub mod service;

pub use consumer::{ProductEventConsumer, ProductEventHandler};
pub use error::{OrderError, Result};
pub use models::*;
pub use repository::{InMemoryStore, PgOrderRepository, PgProductRepository};
pub use service::{OrderService, OrderServiceConfig, QueryService, ReadThroughCache};

/// 基于 Postgres 的订单编排服务
pub type PgOrderService = OrderService<PgProductRepository, PgOrderRepository>;

/// 基于 Postgres 的查询服务
pub type PgQueryService = QueryService<PgProductRepository, PgOrderRepository>;
