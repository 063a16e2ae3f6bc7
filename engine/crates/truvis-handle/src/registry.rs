//! 按 key 共享、引用计数的后端对象
//!
//! 例如多个 Buffer 句柄共享同一个 (instance, device) 对应的内存分配器：
//! 第一个使用者负责初始化，最后一个使用者负责销毁。
//! registry 作为能力注入到具体资源中，每个测试都可以使用独立的 registry。

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{HandleError, HandleResult};

struct RegistryEntry<V> {
    value: Arc<V>,
    ref_count: usize,
}

/// Clone 得到的是同一个 registry
pub struct SharedRegistry<K, V> {
    entries: Arc<Mutex<HashMap<K, RegistryEntry<V>>>>,
}

impl<K, V> Clone for SharedRegistry<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K: Eq + Hash + Clone + Debug, V> Default for SharedRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Debug, V> SharedRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 获取 key 对应的共享对象，引用计数 +1
    ///
    /// 不存在时调用 `init` 创建；`init` 失败时引用计数不变。
    pub fn acquire<E: Display>(&self, key: K, init: impl FnOnce() -> Result<V, E>) -> HandleResult<Arc<V>> {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.ref_count += 1;
            return Ok(entry.value.clone());
        }

        let value = init().map_err(|e| HandleError::Registry(format!("failed to init {:?}: {}", key, e)))?;
        log::debug!("shared registry: init {:?}", key);
        let value = Arc::new(value);
        entries.insert(
            key,
            RegistryEntry {
                value: value.clone(),
                ref_count: 1,
            },
        );
        Ok(value)
    }

    /// 引用计数 -1，归零时移除并调用 `teardown`
    ///
    /// 返回是否调用了 `teardown`。key 不存在时什么也不做。
    pub fn release(&self, key: &K, teardown: impl FnOnce(Arc<V>)) -> bool {
        let released = {
            let mut entries = self.lock();
            let Some(entry) = entries.get_mut(key) else {
                log::warn!("shared registry: release unknown key {:?}", key);
                return false;
            };
            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                return false;
            }
            entries.remove(key).map(|entry| entry.value)
        };

        match released {
            Some(value) => {
                log::debug!("shared registry: teardown {:?}", key);
                teardown(value);
                true
            }
            None => false,
        }
    }

    pub fn ref_count(&self, key: &K) -> usize {
        self.lock().get(key).map_or(0, |entry| entry.ref_count)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, RegistryEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_first_acquire_inits_last_release_tears_down() {
        let registry: SharedRegistry<(u32, u32), String> = SharedRegistry::new();
        let inits = AtomicUsize::new(0);

        let a = registry
            .acquire((1, 2), || {
                inits.fetch_add(1, Ordering::Relaxed);
                Ok::<_, String>("allocator".to_string())
            })
            .unwrap();
        let b = registry
            .acquire((1, 2), || {
                inits.fetch_add(1, Ordering::Relaxed);
                Ok::<_, String>("other".to_string())
            })
            .unwrap();

        assert_eq!(inits.load(Ordering::Relaxed), 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ref_count(&(1, 2)), 2);

        let mut torn_down = Vec::new();
        assert!(!registry.release(&(1, 2), |v| torn_down.push(v)));
        assert!(registry.release(&(1, 2), |v| torn_down.push(v)));
        assert_eq!(torn_down.len(), 1);
        assert!(!registry.contains(&(1, 2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_keys_are_independent() {
        let registry: SharedRegistry<u32, u32> = SharedRegistry::new();
        registry.acquire(1, || Ok::<_, String>(10)).unwrap();
        registry.acquire(2, || Ok::<_, String>(20)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.release(&1, |_| {}));
        assert_eq!(registry.ref_count(&2), 1);
    }

    #[test]
    fn test_failed_init_is_not_registered() {
        let registry: SharedRegistry<u32, u32> = SharedRegistry::new();
        let err = registry.acquire(7, || Err("no device")).unwrap_err();

        assert!(matches!(err, HandleError::Registry(_)));
        assert_eq!(registry.ref_count(&7), 0);
    }

    #[test]
    fn test_release_unknown_key() {
        let registry: SharedRegistry<u32, u32> = SharedRegistry::new();
        assert!(!registry.release(&3, |_| panic!("must not tear down")));
    }

    #[test]
    fn test_clone_shares_entries() {
        let registry: SharedRegistry<u32, u32> = SharedRegistry::new();
        let cloned = registry.clone();
        registry.acquire(1, || Ok::<_, String>(1)).unwrap();
        assert_eq!(cloned.ref_count(&1), 1);
    }
}
