//! 建立在句柄依赖图之上的模拟 Vulkan 对象
//!
//! 依赖关系：
//!
//! ```text
//! Instance <- Device  <- SwapChain <- ImageView
//!          <- Surface <-/
//! Instance, Device <- Buffer (共享 Allocator)
//! ```

use std::sync::Arc;

use truvis_handle::{HandleContext, HandleId, HandleResource, NativeResource, SharedRegistry, TypedHandle};

use crate::driver::{FakeDriver, RawHandle};

pub struct Instance {
    driver: Arc<FakeDriver>,
    raw: Option<RawHandle>,
}

impl Instance {
    pub fn new(driver: Arc<FakeDriver>) -> Self {
        Self { driver, raw: None }
    }
}

impl HandleResource for Instance {
    fn create_impl(&mut self, _ctx: &HandleContext<'_>) -> bool {
        self.raw = Some(self.driver.allocate("instance"));
        true
    }

    fn destroy_impl(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
    }
}

impl NativeResource for Instance {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}

pub struct Device {
    driver: Arc<FakeDriver>,
    raw: Option<RawHandle>,
}

impl Device {
    pub fn new(driver: Arc<FakeDriver>) -> Self {
        Self { driver, raw: None }
    }
}

impl HandleResource for Device {
    fn create_impl(&mut self, _ctx: &HandleContext<'_>) -> bool {
        self.raw = self.driver.allocate_device();
        if self.raw.is_none() {
            log::warn!("device: no usable physical device");
        }
        self.raw.is_some()
    }

    fn destroy_impl(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
    }
}

impl NativeResource for Device {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}

pub struct Surface {
    driver: Arc<FakeDriver>,
    raw: Option<RawHandle>,
}

impl Surface {
    pub fn new(driver: Arc<FakeDriver>) -> Self {
        Self { driver, raw: None }
    }
}

impl HandleResource for Surface {
    fn create_impl(&mut self, _ctx: &HandleContext<'_>) -> bool {
        self.raw = Some(self.driver.allocate("surface"));
        true
    }

    fn destroy_impl(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
    }
}

impl NativeResource for Surface {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}

pub struct SwapChain {
    driver: Arc<FakeDriver>,
    device: TypedHandle<Device>,
    surface: TypedHandle<Surface>,
    image_count: usize,

    raw: Option<RawHandle>,
    images: Vec<RawHandle>,
    extent: [u32; 2],
}

impl SwapChain {
    pub const MAX_EXTENT: u32 = 4096;

    pub fn new(
        driver: Arc<FakeDriver>,
        device: TypedHandle<Device>,
        surface: TypedHandle<Surface>,
        image_count: usize,
    ) -> Self {
        Self {
            driver,
            device,
            surface,
            image_count,
            raw: None,
            images: Vec::new(),
            extent: [0, 0],
        }
    }

    #[inline]
    pub fn extent(&self) -> [u32; 2] {
        self.extent
    }

    #[inline]
    pub fn image(&self, index: usize) -> Option<RawHandle> {
        self.images.get(index).copied()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_count
    }
}

impl HandleResource for SwapChain {
    fn create_impl(&mut self, ctx: &HandleContext<'_>) -> bool {
        if ctx.native(self.device).is_none() || ctx.native(self.surface).is_none() {
            return false;
        }

        let [width, height] = self.driver.window_extent();
        // 最小化的窗口没有可用的 extent
        if width == 0 || height == 0 {
            log::warn!("swapchain: window extent is zero, skip");
            return false;
        }
        self.extent = [width.min(Self::MAX_EXTENT), height.min(Self::MAX_EXTENT)];

        self.raw = Some(self.driver.allocate("swapchain"));
        self.images = (0..self.image_count).map(|_| self.driver.allocate("swapchain-image")).collect();
        log::info!("swapchain: {}x{} with {} images", self.extent[0], self.extent[1], self.images.len());
        true
    }

    fn destroy_impl(&mut self) {
        for image in self.images.drain(..) {
            self.driver.free(image);
        }
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
    }
}

impl NativeResource for SwapChain {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}

pub struct ImageView {
    driver: Arc<FakeDriver>,
    swapchain: TypedHandle<SwapChain>,
    image_index: usize,
    raw: Option<RawHandle>,
}

impl ImageView {
    pub fn new(driver: Arc<FakeDriver>, swapchain: TypedHandle<SwapChain>, image_index: usize) -> Self {
        Self {
            driver,
            swapchain,
            image_index,
            raw: None,
        }
    }
}

impl HandleResource for ImageView {
    fn create_impl(&mut self, ctx: &HandleContext<'_>) -> bool {
        let Some(image) = ctx.get(self.swapchain).and_then(|swapchain| swapchain.image(self.image_index)) else {
            return false;
        };
        log::debug!("image view {} over image {}", self.image_index, image);
        self.raw = Some(self.driver.allocate("image-view"));
        true
    }

    fn destroy_impl(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
    }
}

impl NativeResource for ImageView {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}

/// 同一对 (instance, device) 下的所有 Buffer 共享一个 Allocator
pub struct Allocator {
    driver: Arc<FakeDriver>,
    raw: RawHandle,
}

impl Allocator {
    #[inline]
    pub fn raw(&self) -> RawHandle {
        self.raw
    }

    fn destroy(&self) {
        self.driver.free(self.raw);
    }
}

pub type AllocatorKey = (HandleId, HandleId);
pub type AllocatorRegistry = SharedRegistry<AllocatorKey, Allocator>;

pub struct Buffer {
    driver: Arc<FakeDriver>,
    allocators: AllocatorRegistry,
    instance: TypedHandle<Instance>,
    device: TypedHandle<Device>,
    size: u64,

    raw: Option<RawHandle>,
    allocator: Option<Arc<Allocator>>,
}

impl Buffer {
    pub fn new(
        driver: Arc<FakeDriver>,
        allocators: AllocatorRegistry,
        instance: TypedHandle<Instance>,
        device: TypedHandle<Device>,
        size: u64,
    ) -> Self {
        Self {
            driver,
            allocators,
            instance,
            device,
            size,
            raw: None,
            allocator: None,
        }
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    fn allocator_key(&self) -> AllocatorKey {
        (self.instance.id(), self.device.id())
    }
}

impl HandleResource for Buffer {
    fn create_impl(&mut self, ctx: &HandleContext<'_>) -> bool {
        if ctx.native(self.instance).is_none() || ctx.native(self.device).is_none() {
            return false;
        }

        let driver = self.driver.clone();
        let allocator = self.allocators.acquire(self.allocator_key(), || {
            Ok::<_, String>(Allocator {
                raw: driver.allocate("allocator"),
                driver,
            })
        });
        match allocator {
            Ok(allocator) => {
                log::debug!("buffer: {} bytes from allocator {}", self.size, allocator.raw());
                self.allocator = Some(allocator);
                self.raw = Some(self.driver.allocate("buffer"));
                true
            }
            Err(err) => {
                log::error!("buffer: {}", err);
                false
            }
        }
    }

    fn destroy_impl(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.driver.free(raw);
        }
        if self.allocator.take().is_some() {
            self.allocators.release(&self.allocator_key(), |allocator| allocator.destroy());
        }
    }
}

impl NativeResource for Buffer {
    type Native = RawHandle;
    fn native(&self) -> Option<RawHandle> {
        self.raw
    }
}
