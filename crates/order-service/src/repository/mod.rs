//! 数据库仓储层
//!
//! 提供库存与订单的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 库存扣减只通过条件 UPDATE 完成，不做先读后写
//! - 下单与取消各自是一个事务，失败时不留下任何部分状态
//! - 定义 trait 接口以支持 mock 测试和内存存储替换

mod memory;
mod order_repo;
mod product_repo;
mod traits;

pub use memory::InMemoryStore;
pub use order_repo::PgOrderRepository;
pub use product_repo::PgProductRepository;
pub use traits::*;
