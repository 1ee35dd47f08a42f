//! 订单状态枚举
//!
//! 支持数据库（sqlx，小写 varchar）和 JSON（serde）序列化

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::OrderError;

/// 订单状态
///
/// ```text
/// created -> processing -> delivered
/// created | processing -> cancelled
/// ```
/// `delivered` 与 `cancelled` 为终态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderStatus {
    /// 已创建 - 库存已扣减
    #[default]
    Created,
    /// 处理中
    Processing,
    /// 已送达（终态）
    Delivered,
    /// 已取消（终态）- 库存已归还
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// 解析状态更新请求中的目标状态
    ///
    /// 只接受 `processing` / `delivered` / `cancelled`；`created` 只能由下单产生
    pub fn parse_target(value: &str) -> Result<Self, OrderError> {
        match value.parse::<Self>()? {
            Self::Created => Err(OrderError::Validation(
                "目标状态必须是 processing、delivered 或 cancelled".to_string(),
            )),
            status => Ok(status),
        }
    }

    /// 校验状态流转
    ///
    /// 对已取消订单再次取消返回 `AlreadyCancelled`，其余非法流转返回 `InvalidTransition`
    pub fn check_transition(self, order_id: i64, to: OrderStatus) -> Result<(), OrderError> {
        use OrderStatus::*;

        match (self, to) {
            (Created, Processing)
            | (Processing, Delivered)
            | (Created, Cancelled)
            | (Processing, Cancelled) => Ok(()),
            (Cancelled, Cancelled) => Err(OrderError::AlreadyCancelled(order_id)),
            (from, to) => Err(OrderError::InvalidTransition { order_id, from, to }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrderError::Validation(format!("未知的订单状态: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(OrderStatus::Created.check_transition(1, OrderStatus::Processing).is_ok());
        assert!(OrderStatus::Created.check_transition(1, OrderStatus::Cancelled).is_ok());
        assert!(OrderStatus::Processing.check_transition(1, OrderStatus::Delivered).is_ok());
        assert!(OrderStatus::Processing.check_transition(1, OrderStatus::Cancelled).is_ok());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let all = [
            OrderStatus::Created,
            OrderStatus::Processing,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ];
        for from in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            assert!(from.is_terminal());
            for to in all {
                assert!(from.check_transition(9, to).is_err(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_cancel_twice_is_already_cancelled() {
        let err = OrderStatus::Cancelled
            .check_transition(3, OrderStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, OrderError::AlreadyCancelled(3)));
    }

    #[test]
    fn test_skip_and_self_transitions_are_invalid() {
        let err = OrderStatus::Created
            .check_transition(4, OrderStatus::Delivered)
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));

        let err = OrderStatus::Processing
            .check_transition(4, OrderStatus::Processing)
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidTransition { .. }));
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(
            OrderStatus::parse_target("Cancelled").unwrap(),
            OrderStatus::Cancelled
        );
        assert!(matches!(
            OrderStatus::parse_target("created"),
            Err(OrderError::Validation(_))
        ));
        assert!(matches!(
            OrderStatus::parse_target("shipped"),
            Err(OrderError::Validation(_))
        ));
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&OrderStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
