//! 服务层
//!
//! 实现订单业务逻辑，协调仓储层和缓存层。
//!
//! ## 模块结构
//!
//! - `cache`: 读穿透缓存协调器
//! - `order_service`: 下单与状态流转（写路径）
//! - `query_service`: 订单与商品查询（读路径）

pub mod cache;
pub mod order_service;
pub mod query_service;

pub use cache::ReadThroughCache;
pub use order_service::{OrderService, OrderServiceConfig};
pub use query_service::QueryService;
