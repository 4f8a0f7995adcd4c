// 沙箱管理器（Sandbox Manager）
//
// 按配置缓存沙箱（LRU）。合并后配置相同的测试共享同一个沙箱；
// `SandboxReuse::Never`的测试总是得到一个全新的沙箱，也不会进入缓存。

use lru::LruCache;
use parking_lot::Mutex;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use shade_common::{ConfigOverrides, SandboxConfig, SandboxReuse};
use shade_error::{ShadeResult, utils};

use crate::environment::Environment;
use crate::sandbox::{Sandbox, TestContext};

/// Hands out sandboxes for test configurations
pub struct SandboxManager {
    environment: Arc<Environment>,
    cache: Mutex<LruCache<String, Arc<Sandbox>>>,
    created: AtomicU64,
}

impl SandboxManager {
    /// 创建管理器，缓存容量取自基础配置的`sandbox_cache_size`
    pub fn new(environment: impl Into<Arc<Environment>>) -> Self {
        let environment = environment.into();
        let capacity = NonZeroUsize::new(environment.base_config().sandbox_cache_size)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            environment,
            cache: Mutex::new(LruCache::new(capacity)),
            created: AtomicU64::new(0),
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// 合并测试级覆盖项后的配置
    pub fn config_for(&self, overrides: &ConfigOverrides) -> ShadeResult<SandboxConfig> {
        Ok(self.environment.base_config().merge(overrides)?)
    }

    /// 获取（或创建）适用于`overrides`的沙箱
    pub fn sandbox_for(&self, overrides: &ConfigOverrides) -> ShadeResult<Arc<Sandbox>> {
        let config = self.config_for(overrides)?;
        if config.reuse == SandboxReuse::Never {
            let sandbox = self.create(config)?;
            log::debug!("Sandbox {} is not shared (reuse = never)", sandbox.id());
            return Ok(sandbox);
        }

        let key = config.sandbox_key();
        let mut cache = self.cache.lock();
        if let Some(sandbox) = cache.get(&key) {
            log::trace!("Reusing sandbox {} for {}", sandbox.id(), key);
            return Ok(Arc::clone(sandbox));
        }

        let sandbox = self.create(config)?;
        if let Some((_, previous)) = cache.peek_lru() {
            let changed = previous
                .runtime()
                .shadow_map()
                .invalidated_classes(sandbox.runtime().shadow_map());
            if !changed.is_empty() {
                log::debug!(
                    "Sandbox {} cannot reuse sandbox {}: shadows differ for {:?}",
                    sandbox.id(),
                    previous.id(),
                    changed
                );
            }
        }
        if let Some((evicted_key, evicted)) = cache.push(key.clone(), Arc::clone(&sandbox))
            && evicted_key != key
        {
            log::debug!("Evicted sandbox {} ({})", evicted.id(), evicted_key);
        }
        Ok(sandbox)
    }

    /// 在合适的沙箱中运行一个测试
    pub fn run<F, R>(&self, name: &str, overrides: &ConfigOverrides, body: F) -> ShadeResult<R>
    where
        F: FnOnce(&TestContext<'_>) -> R,
    {
        let sandbox = self.sandbox_for(overrides)?;
        sandbox.run_test(name, body)
    }

    /// Number of cached sandboxes
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Number of sandboxes created so far
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// 丢弃所有缓存的沙箱
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    fn create(&self, config: SandboxConfig) -> ShadeResult<Arc<Sandbox>> {
        match Sandbox::new(&self.environment, config) {
            Ok(sandbox) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(sandbox))
            }
            Err(e) => {
                utils::log_error("Sandbox creation", &e);
                Err(e)
            }
        }
    }
}

impl fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxManager")
            .field("environment", &self.environment)
            .field("cached", &self.cached())
            .field("created", &self.created())
            .finish()
    }
}
