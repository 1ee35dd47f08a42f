//! 订单服务领域模型

pub mod enums;
pub mod order;
pub mod product;

pub use enums::OrderStatus;
pub use order::{
    Caller, LineItemRequest, NewOrder, NewOrderItem, Order, OrderDetail, OrderItem,
    OrderItemDetail, OrderedProduct, PlaceOrderRequest, StatusUpdateRequest,
};
pub use product::Product;
