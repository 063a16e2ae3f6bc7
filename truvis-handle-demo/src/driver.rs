//! 模拟的图形驱动
//!
//! 分配递增的原生句柄并记录存活对象，用来验证句柄依赖图没有泄漏。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type RawHandle = u64;

struct DriverState {
    next_handle: RawHandle,
    live: HashMap<RawHandle, &'static str>,
    device_lost: bool,
    window_extent: [u32; 2],
}

pub struct FakeDriver {
    state: Mutex<DriverState>,
}

// new & init
impl FakeDriver {
    pub fn new(window_extent: [u32; 2]) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DriverState {
                next_handle: 1,
                live: HashMap::new(),
                device_lost: false,
                window_extent,
            }),
        })
    }
}

// objects
impl FakeDriver {
    pub fn allocate(&self, kind: &'static str) -> RawHandle {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.live.insert(handle, kind);
        handle
    }

    /// device lost 时返回 None
    pub fn allocate_device(&self) -> Option<RawHandle> {
        if self.lock().device_lost {
            return None;
        }
        Some(self.allocate("device"))
    }

    pub fn free(&self, handle: RawHandle) {
        if self.lock().live.remove(&handle).is_none() {
            log::error!("driver: double free of {}", handle);
        }
    }

    pub fn live_objects(&self) -> usize {
        self.lock().live.len()
    }

    pub fn live_of_kind(&self, kind: &str) -> usize {
        self.lock().live.values().filter(|&&k| k == kind).count()
    }
}

// window & device state
impl FakeDriver {
    pub fn set_device_lost(&self, lost: bool) {
        self.lock().device_lost = lost;
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.lock().window_extent = [width, height];
    }

    pub fn window_extent(&self) -> [u32; 2] {
        self.lock().window_extent
    }

    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
