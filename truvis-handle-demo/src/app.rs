use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use truvis_handle::{HandleGraph, HandleGraphSettings, TypedHandle};

use crate::driver::{FakeDriver, RawHandle};
use crate::resources::{AllocatorRegistry, Buffer, Device, ImageView, Instance, Surface, SwapChain};

/// 一帧需要的原生句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub extent: [u32; 2],
    pub swapchain: RawHandle,
    pub image_views: Vec<RawHandle>,
    pub vertex_buffer: RawHandle,
}

/// 持有整条呈现链的应用
///
/// 构造时只注册句柄和依赖，真正的创建发生在第一次 `draw_frame`。
pub struct PresentationApp {
    driver: Arc<FakeDriver>,
    graph: HandleGraph,

    device: TypedHandle<Device>,
    surface: TypedHandle<Surface>,
    swapchain: TypedHandle<SwapChain>,
    image_views: Vec<TypedHandle<ImageView>>,
    vertex_buffer: TypedHandle<Buffer>,
    index_buffer: TypedHandle<Buffer>,
}

// new & init
impl PresentationApp {
    pub const SWAPCHAIN_IMAGE_COUNT: usize = 3;

    /// 随 demo 一起发布的配置文件
    pub const DEFAULT_SETTINGS_FILE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/handle-graph.toml");

    /// 未指定路径时读取 `DEFAULT_SETTINGS_FILE`，它也不存在时使用默认配置
    pub fn settings_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
        explicit.or_else(|| {
            let default = PathBuf::from(Self::DEFAULT_SETTINGS_FILE);
            default.is_file().then_some(default)
        })
    }

    /// 从 TOML 文件读取 graph 配置，没有给出路径时使用默认配置
    pub fn load_settings(path: Option<&Path>) -> anyhow::Result<HandleGraphSettings> {
        let Some(path) = path else {
            return Ok(HandleGraphSettings::default());
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let settings = HandleGraphSettings::from_toml_str(&text).with_context(|| format!("parse {}", path.display()))?;
        Ok(settings)
    }

    pub fn new(driver: Arc<FakeDriver>, settings: HandleGraphSettings) -> anyhow::Result<Self> {
        let mut graph = HandleGraph::with_settings(settings);
        let allocators = AllocatorRegistry::new();

        let instance = graph.insert_typed("instance", Instance::new(driver.clone()));
        let device = graph.insert_typed("device", Device::new(driver.clone()));
        let surface = graph.insert_typed("surface", Surface::new(driver.clone()));
        graph.add_dependency(device, instance)?;
        graph.add_dependency(surface, instance)?;

        let swapchain = graph.insert_typed(
            "swapchain",
            SwapChain::new(driver.clone(), device, surface, Self::SWAPCHAIN_IMAGE_COUNT),
        );
        graph.add_dependency(swapchain, device)?;
        graph.add_dependency(swapchain, surface)?;

        let first_view = graph.insert_typed("image-view-0", ImageView::new(driver.clone(), swapchain, 0));
        graph.add_dependency(first_view, swapchain)?;
        let mut image_views = vec![first_view];
        for index in 1..Self::SWAPCHAIN_IMAGE_COUNT {
            let view = graph.insert_like(
                first_view,
                format!("image-view-{index}"),
                ImageView::new(driver.clone(), swapchain, index),
            )?;
            image_views.push(view);
        }

        let vertex_buffer = graph.insert_typed(
            "vertex-buffer",
            Buffer::new(driver.clone(), allocators.clone(), instance, device, 3 * 32),
        );
        graph.add_dependency(vertex_buffer, instance)?;
        graph.add_dependency(vertex_buffer, device)?;
        let index_buffer = graph.insert_like(
            vertex_buffer,
            "index-buffer",
            Buffer::new(driver.clone(), allocators, instance, device, 3 * 4),
        )?;

        log::info!("registered {} handles", graph.len());

        Ok(Self {
            driver,
            graph,
            device,
            surface,
            swapchain,
            image_views,
            vertex_buffer,
            index_buffer,
        })
    }
}

// frame
impl PresentationApp {
    /// 使用所有资源；未创建的资源会连同依赖一起被创建
    pub fn draw_frame(&mut self) -> anyhow::Result<FrameInfo> {
        let swapchain = self.graph.native(self.swapchain).context("acquire swapchain")?;
        let extent = self.graph.get_or_create(self.swapchain)?.extent();

        let image_views = self
            .image_views
            .iter()
            .map(|&view| self.graph.native(view))
            .collect::<Result<Vec<_>, _>>()
            .context("acquire image views")?;

        let vertex_buffer = self.graph.native(self.vertex_buffer).context("acquire vertex buffer")?;
        self.graph.native(self.index_buffer).context("acquire index buffer")?;

        Ok(FrameInfo {
            extent,
            swapchain,
            image_views,
            vertex_buffer,
        })
    }

    /// 窗口尺寸变化：重建 swapchain，image views 会被自动销毁并重建
    pub fn on_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        log::info!("window resized to {}x{}", width, height);
        self.driver.resize(width, height);
        self.graph.create(self.swapchain)?;
        Ok(())
    }

    /// 重建 device，所有依赖 device 的资源都会被级联处理
    pub fn rebuild_device(&mut self) -> anyhow::Result<bool> {
        Ok(self.graph.create(self.device)?)
    }

    /// 重新获取 surface（例如窗口被重新创建）
    pub fn rebuild_surface(&mut self) -> anyhow::Result<bool> {
        Ok(self.graph.create(self.surface)?)
    }

    #[inline]
    pub fn graph(&self) -> &HandleGraph {
        &self.graph
    }

    #[inline]
    pub fn driver(&self) -> &Arc<FakeDriver> {
        &self.driver
    }
}

/// 依次演示：首次使用、resize、device lost、恢复、释放
pub fn run(settings: HandleGraphSettings) -> anyhow::Result<()> {
    let driver = FakeDriver::new([1200, 800]);

    {
        let mut app = PresentationApp::new(driver.clone(), settings)?;

        let frame = app.draw_frame()?;
        log::info!("first frame: {:?}", frame);

        app.on_resize(1920, 1080)?;
        let frame = app.draw_frame()?;
        log::info!("after resize: {:?}", frame);

        driver.set_device_lost(true);
        if !app.rebuild_device()? {
            log::warn!("device lost, {} objects alive", driver.live_objects());
        }
        if let Err(err) = app.draw_frame() {
            log::warn!("cannot draw while device is lost: {:#}", err);
        }

        driver.set_device_lost(false);
        let frame = app.draw_frame()?;
        log::info!("after device recovery: {:?}", frame);
    }

    let leaked = driver.live_objects();
    if leaked > 0 {
        anyhow::bail!("{} native objects leaked", leaked);
    }
    log::info!("all native objects released");
    Ok(())
}

#[cfg(test)]
mod tests {
    use truvis_handle::DependencyFailurePolicy;

    use super::*;

    fn app() -> (Arc<FakeDriver>, PresentationApp) {
        let driver = FakeDriver::new([800, 600]);
        let app = PresentationApp::new(driver.clone(), HandleGraphSettings::default()).unwrap();
        (driver, app)
    }

    #[test]
    fn test_nothing_created_before_first_frame() {
        let (driver, app) = app();
        assert_eq!(driver.live_objects(), 0);
        assert!(app.graph().iter().all(|(_, handle)| !handle.is_created()));
    }

    #[test]
    fn test_first_frame_creates_chain() {
        let (driver, mut app) = app();
        let frame = app.draw_frame().unwrap();

        assert_eq!(frame.extent, [800, 600]);
        assert_eq!(frame.image_views.len(), PresentationApp::SWAPCHAIN_IMAGE_COUNT);
        assert_eq!(driver.live_of_kind("instance"), 1);
        assert_eq!(driver.live_of_kind("device"), 1);
        assert_eq!(driver.live_of_kind("swapchain-image"), 3);
        assert_eq!(driver.live_of_kind("image-view"), 3);
        // 两个 buffer 共享一个 allocator
        assert_eq!(driver.live_of_kind("buffer"), 2);
        assert_eq!(driver.live_of_kind("allocator"), 1);
    }

    #[test]
    fn test_resize_rebuilds_swapchain_and_views_only() {
        let (driver, mut app) = app();
        let before = app.draw_frame().unwrap();

        app.on_resize(1024, 768).unwrap();
        assert!(app.graph().iter().all(|(_, handle)| handle.is_created()));

        let after = app.draw_frame().unwrap();
        assert_eq!(after.extent, [1024, 768]);
        assert_ne!(after.swapchain, before.swapchain);
        assert_ne!(after.image_views, before.image_views);
        assert_eq!(after.vertex_buffer, before.vertex_buffer);
        assert_eq!(driver.live_of_kind("image-view"), 3);
        assert_eq!(driver.live_of_kind("swapchain"), 1);
    }

    #[test]
    fn test_resize_is_clamped() {
        let (_driver, mut app) = app();
        app.on_resize(10_000, 500).unwrap();
        assert_eq!(app.draw_frame().unwrap().extent, [SwapChain::MAX_EXTENT, 500]);
    }

    #[test]
    fn test_minimized_window_leaves_swapchain_uncreated() {
        let (_driver, mut app) = app();
        app.draw_frame().unwrap();

        app.on_resize(0, 0).unwrap();
        assert!(app.draw_frame().is_err());

        app.on_resize(640, 480).unwrap();
        assert_eq!(app.draw_frame().unwrap().extent, [640, 480]);
    }

    #[test]
    fn test_device_lost_and_recovery() {
        let (driver, mut app) = app();
        app.draw_frame().unwrap();

        driver.set_device_lost(true);
        assert!(!app.rebuild_device().unwrap());
        assert_eq!(driver.live_of_kind("device"), 0);
        assert_eq!(driver.live_of_kind("swapchain"), 0);
        assert_eq!(driver.live_of_kind("buffer"), 0);
        assert_eq!(driver.live_of_kind("allocator"), 0);
        // surface 只依赖 instance，不受影响
        assert_eq!(driver.live_of_kind("surface"), 1);
        assert!(app.draw_frame().is_err());

        driver.set_device_lost(false);
        app.draw_frame().unwrap();
        assert_eq!(driver.live_of_kind("device"), 1);
        assert_eq!(driver.live_of_kind("allocator"), 1);
    }

    #[test]
    fn test_surface_rebuild_keeps_buffers() {
        let (driver, mut app) = app();
        let before = app.draw_frame().unwrap();

        assert!(app.rebuild_surface().unwrap());
        assert_eq!(driver.live_of_kind("swapchain"), 1);
        assert_eq!(app.draw_frame().unwrap().vertex_buffer, before.vertex_buffer);
    }

    #[test]
    fn test_drop_releases_all_native_objects() {
        let driver = FakeDriver::new([800, 600]);
        {
            let settings = HandleGraphSettings::default().with_failure_policy(DependencyFailurePolicy::ShortCircuit);
            let mut app = PresentationApp::new(driver.clone(), settings).unwrap();
            app.draw_frame().unwrap();
            app.on_resize(1280, 720).unwrap();
            assert!(driver.live_objects() > 0);
        }
        assert_eq!(driver.live_objects(), 0);
    }

    #[test]
    fn test_run_scenario() {
        run(HandleGraphSettings::default()).unwrap();
    }

    #[test]
    fn test_load_default_settings() {
        let settings = PresentationApp::load_settings(None).unwrap();
        assert_eq!(settings, HandleGraphSettings::default());
        assert!(PresentationApp::load_settings(Some(Path::new("does-not-exist.toml"))).is_err());
    }

    #[test]
    fn test_shipped_settings_file_is_loaded_by_default() {
        let path = PresentationApp::settings_path(None).unwrap();
        assert_eq!(path, PathBuf::from(PresentationApp::DEFAULT_SETTINGS_FILE));

        let settings = PresentationApp::load_settings(Some(&path)).unwrap();
        assert_eq!(settings.failure_policy, DependencyFailurePolicy::ShortCircuit);
        assert!(settings.validate_edges);

        let explicit = PathBuf::from("other.toml");
        assert_eq!(PresentationApp::settings_path(Some(explicit.clone())), Some(explicit));
    }
}
