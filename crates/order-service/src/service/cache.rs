//! 读穿透缓存协调器
//!
//! 缓存只是优化层：关闭缓存时所有操作依然正确。缓存的读、写、删除都有超时上限，
//! 任何缓存错误只记录警告并绕过，不会传播给调用方。
//!
//! ## 一致性
//!
//! 只有正在回源加载的键才登记代数（generation）。失效时若该键有加载在途则递增代数，
//! 然后删除键；回填时若代数在加载期间变化则跳过写入，写入后再次核对代数，
//! 若期间发生了失效则删除刚写入的条目。最后一个加载结束时登记随之移除，
//! 登记表的大小只取决于并发加载数。没有加载在途时失效无需记录：
//! 之后开始的加载必然读到变更后的存储。
//! 删除失败的键记为待失效，在删除成功之前一律视为未命中。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde::{Serialize, de::DeserializeOwned};
use shop_shared::cache::CacheBackend;
use shop_shared::observability::metrics as shop_metrics;
use shop_shared::timeout::with_timeout;
use tracing::{debug, warn};

use crate::error::Result;

/// 某个键的在途加载登记
#[derive(Debug, Default)]
struct InFlight {
    loads: usize,
    generation: u64,
}

#[derive(Clone)]
pub struct ReadThroughCache {
    backend: Option<Arc<dyn CacheBackend>>,
    timeout: Duration,
    in_flight: Arc<DashMap<String, InFlight>>,
    pending: Arc<DashSet<String>>,
}

/// 加载结束（含被取消）时注销登记
struct LoadGuard<'a> {
    in_flight: &'a DashMap<String, InFlight>,
    key: &'a str,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut entry) = self.in_flight.get_mut(self.key) {
            entry.loads = entry.loads.saturating_sub(1);
        }
        self.in_flight.remove_if(self.key, |_, entry| entry.loads == 0);
    }
}

impl ReadThroughCache {
    pub fn new(backend: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self {
            backend: Some(backend),
            timeout,
            in_flight: Arc::new(DashMap::new()),
            pending: Arc::new(DashSet::new()),
        }
    }

    /// 不使用缓存，每次都从存储加载
    pub fn disabled() -> Self {
        Self {
            backend: None,
            timeout: Duration::ZERO,
            in_flight: Arc::new(DashMap::new()),
            pending: Arc::new(DashSet::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn generation(&self, key: &str) -> u64 {
        self.in_flight.get(key).map_or(0, |entry| entry.generation)
    }

    /// 登记一次在途加载，返回登记时的代数
    fn begin_load<'a>(&'a self, key: &'a str) -> (LoadGuard<'a>, u64) {
        let mut entry = self.in_flight.entry(key.to_string()).or_default();
        entry.loads += 1;
        let generation = entry.generation;
        drop(entry);

        (
            LoadGuard {
                in_flight: &self.in_flight,
                key,
            },
            generation,
        )
    }

    /// 读穿透：命中直接返回，未命中或条目损坏时调用 `loader` 并回填
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(backend) = self.backend.as_ref() else {
            return loader().await;
        };

        if self.pending.contains(key) && !self.delete_quietly(backend.as_ref(), key).await {
            shop_metrics::record_cache_request("error");
            return loader().await;
        }

        match with_timeout(self.timeout, "cache.get", backend.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    shop_metrics::record_cache_request("hit");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(key, error = %e, "缓存条目无法解析，删除后回源");
                    shop_metrics::record_cache_request("error");
                    self.delete_quietly(backend.as_ref(), key).await;
                }
            },
            Ok(None) => shop_metrics::record_cache_request("miss"),
            Err(e) => {
                warn!(key, error = %e, "缓存读取失败，回源");
                shop_metrics::record_cache_request("error");
            }
        }

        let (_guard, generation) = self.begin_load(key);
        let value = loader().await?;

        if self.generation(key) != generation {
            debug!(key, "加载期间缓存被失效，跳过回填");
            return Ok(value);
        }

        match serde_json::to_string(&value) {
            Ok(raw) => {
                let written =
                    with_timeout(self.timeout, "cache.set", backend.set(key, &raw, ttl)).await;
                if let Err(e) = written {
                    warn!(key, error = %e, "缓存回填失败");
                } else if self.generation(key) != generation {
                    // 写入与失效交错，撤销刚写入的旧值
                    self.delete_quietly(backend.as_ref(), key).await;
                }
            }
            Err(e) => warn!(key, error = %e, "缓存值序列化失败"),
        }

        Ok(value)
    }

    /// 使一个键失效
    pub async fn invalidate(&self, key: &str) {
        if let Some(mut entry) = self.in_flight.get_mut(key) {
            entry.generation += 1;
        }

        if let Some(backend) = self.backend.as_ref() {
            self.delete_quietly(backend.as_ref(), key).await;
        }
    }

    pub async fn invalidate_all<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.invalidate(key.as_ref()).await;
        }
    }

    /// 删除失败时记为待失效，返回是否删除成功
    async fn delete_quietly(&self, backend: &dyn CacheBackend, key: &str) -> bool {
        match with_timeout(self.timeout, "cache.delete", backend.delete(key)).await {
            Ok(()) => {
                self.pending.remove(key);
                true
            }
            Err(e) => {
                warn!(key, error = %e, "缓存删除失败，标记为待失效");
                self.pending.insert(key.to_string());
                false
            }
        }
    }
}
