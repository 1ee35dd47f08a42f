//! 阻塞调用的超时控制
//!
//! 存储和缓存调用都必须有上限，超时统一转换为可重试的 `ShopError::Timeout`。

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ShopError;

/// 为异步操作施加超时
///
/// 内部错误类型只需能从 `ShopError` 转换，便于业务错误类型直接复用
pub async fn with_timeout<T, E, Fut>(duration: Duration, operation: &str, fut: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<ShopError>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, timeout_ms = duration.as_millis() as u64, "操作超时");
            Err(E::from(ShopError::Timeout {
                operation: operation.to_string(),
            }))
        }
    }
}
