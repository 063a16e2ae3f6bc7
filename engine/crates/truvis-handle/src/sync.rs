//! 多线程共享的 HandleGraph
//!
//! graph 的所有生命周期操作都需要 `&mut HandleGraph`，
//! 因此一次级联 create/destroy 总是在同一把锁内完成，
//! 其他线程看不到执行到一半的依赖图。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::graph::HandleGraph;
use crate::settings::HandleGraphSettings;

#[derive(Clone, Default)]
pub struct SharedHandleGraph {
    inner: Arc<Mutex<HandleGraph>>,
}

impl SharedHandleGraph {
    pub fn new(graph: HandleGraph) -> Self {
        Self {
            inner: Arc::new(Mutex::new(graph)),
        }
    }

    pub fn with_settings(settings: HandleGraphSettings) -> Self {
        Self::new(HandleGraph::with_settings(settings))
    }

    /// 资源回调中发生 panic 不会破坏依赖边，因此直接忽略 poison
    pub fn lock(&self) -> MutexGuard<'_, HandleGraph> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut HandleGraph) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handle::{HandleContext, HandleResource};

    struct Counter {
        creates: Arc<AtomicUsize>,
    }

    impl HandleResource for Counter {
        fn create_impl(&mut self, _ctx: &HandleContext<'_>) -> bool {
            self.creates.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn destroy_impl(&mut self) {}
    }

    #[test]
    fn test_ensure_created_from_many_threads() {
        let creates = Arc::new(AtomicUsize::new(0));
        let shared = SharedHandleGraph::default();
        let device = shared.with(|graph| {
            graph.insert(
                "device",
                Counter {
                    creates: creates.clone(),
                },
            )
        });

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || shared.with(|graph| graph.ensure_created(device).unwrap()))
            })
            .collect();
        for thread in threads {
            assert!(thread.join().unwrap());
        }

        assert_eq!(creates.load(Ordering::SeqCst), 1);
        assert!(shared.lock().is_created(device));
    }
}
