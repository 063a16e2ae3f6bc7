//! 资源句柄依赖图
//!
//! 跟踪外部资源（通常是 GPU 资源）之间的依赖关系，保证创建或销毁一个资源时，
//! 依赖它的资源和它依赖的资源都按正确的顺序被级联处理。
//!
//! # 核心概念
//!
//! - **HandleGraph**: 句柄的 arena，依赖边用 `HandleId` 表示
//! - **HandleResource**: 具体资源类型提供的 `create_impl` / `destroy_impl`
//! - **TypedHandle**: 带类型的句柄，`get_or_create` 会按需创建整条依赖链
//! - **SharedRegistry**: 按 key 共享、引用计数的后端对象（例如内存分配器）
//! - **SharedHandleGraph**: 跨线程共享的 graph
//!
//! # 使用示例
//!
//! ```ignore
//! use truvis_handle::*;
//!
//! let mut graph = HandleGraph::new();
//! let device = graph.insert_typed("device", Device::new());
//! let surface = graph.insert_typed("surface", Surface::new(window));
//! let swapchain = graph.insert_typed("swapchain", SwapChain::new(device, surface));
//! graph.add_dependency(surface, device)?;
//! graph.add_dependency(swapchain, device)?;
//! graph.add_dependency(swapchain, surface)?;
//!
//! // 第一次使用时创建 device -> surface -> swapchain
//! let vk_swapchain = graph.native(swapchain)?;
//!
//! // 窗口 resize：重建 surface，swapchain 会被自动销毁并重建
//! graph.create(surface)?;
//! ```

mod error;
mod graph;
mod handle;
mod registry;
mod settings;
mod sync;
mod typed;

pub use error::{HandleError, HandleResult};
pub use graph::HandleGraph;
pub use handle::{AsAny, HandleContext, HandleId, HandleResource, ResourceHandle};
pub use registry::SharedRegistry;
pub use settings::{DependencyFailurePolicy, HandleGraphSettings};
pub use sync::SharedHandleGraph;
pub use typed::{NativeResource, TypedHandle};
