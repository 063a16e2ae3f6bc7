//! 资源句柄的基础定义
//!
//! - `HandleId`: 句柄在 `HandleGraph` 中的 key
//! - `HandleResource`: 具体资源类型需要实现的创建/销毁过程
//! - `ResourceHandle`: graph 中的一个槽位，记录创建状态与依赖边
//! - `HandleContext`: 创建过程中访问其他句柄（通常是依赖）的只读视图

use std::any::Any;

use indexmap::IndexSet;
use slotmap::{SlotMap, new_key_type};

use crate::typed::{NativeResource, TypedHandle};

new_key_type! {
    /// 句柄的身份就是它在 arena 中的 key，移动资源对象不会使依赖边失效
    pub struct HandleId;
}

/// 用于从 `dyn HandleResource` 向下转型
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
    #[inline]
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 具体资源类型（Device、SwapChain、ImageView ...）需要提供的两个过程
///
/// # 约定
/// - 两个过程可能以 create -> destroy -> create ... 的顺序被反复调用
/// - 不能假设调用线程
/// - `destroy_impl` 只会在资源处于 CREATED 状态时被调用
pub trait HandleResource: AsAny + Send + 'static {
    /// 获取外部资源，返回是否成功
    ///
    /// 调用时所有依赖都已经尝试过创建，可以通过 `ctx` 读取它们。
    fn create_impl(&mut self, ctx: &HandleContext<'_>) -> bool;

    /// 无条件释放外部资源
    fn destroy_impl(&mut self);
}

/// 创建过程中被临时取走的资源的占位
pub(crate) struct VacantResource;

impl HandleResource for VacantResource {
    fn create_impl(&mut self, _ctx: &HandleContext<'_>) -> bool {
        false
    }
    fn destroy_impl(&mut self) {}
}

#[inline]
pub(crate) fn downcast_ref<T: HandleResource>(resource: &dyn HandleResource) -> Option<&T> {
    resource.as_any().downcast_ref::<T>()
}

#[inline]
pub(crate) fn downcast_mut<T: HandleResource>(resource: &mut dyn HandleResource) -> Option<&mut T> {
    resource.as_any_mut().downcast_mut::<T>()
}

/// HandleGraph 中的一个句柄
///
/// `dependencies` 与 `dependents` 都是非拥有的边，`add_dependency` 会同时维护两侧。
pub struct ResourceHandle {
    pub(crate) name: String,
    pub(crate) created: bool,

    /// 正在执行 create，用于检测重入
    pub(crate) creating: bool,
    /// 正在级联销毁 dependents，用于在环上终止递归
    pub(crate) destroying: bool,

    /// 创建当前句柄之前必须存在的句柄
    pub(crate) dependencies: IndexSet<HandleId>,
    /// 依赖当前句柄的句柄
    pub(crate) dependents: IndexSet<HandleId>,

    pub(crate) resource: Box<dyn HandleResource>,
}

// new & init
impl ResourceHandle {
    pub(crate) fn new(name: String, resource: Box<dyn HandleResource>) -> Self {
        Self {
            name,
            created: false,
            creating: false,
            destroying: false,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            resource,
        }
    }
}

// getters
impl ResourceHandle {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_created(&self) -> bool {
        self.created
    }

    #[inline]
    pub fn dependencies(&self) -> &IndexSet<HandleId> {
        &self.dependencies
    }

    #[inline]
    pub fn dependents(&self) -> &IndexSet<HandleId> {
        &self.dependents
    }

    #[inline]
    pub fn resource(&self) -> &dyn HandleResource {
        &*self.resource
    }
}

impl std::fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("name", &self.name)
            .field("created", &self.created)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .finish()
    }
}

/// 传递给 `HandleResource::create_impl` 的上下文
///
/// 只读；正在创建的句柄自身的资源此时不可访问。
pub struct HandleContext<'a> {
    handles: &'a SlotMap<HandleId, ResourceHandle>,
    current: HandleId,
}

impl<'a> HandleContext<'a> {
    pub(crate) fn new(handles: &'a SlotMap<HandleId, ResourceHandle>, current: HandleId) -> Self {
        Self { handles, current }
    }

    /// 正在创建的句柄
    #[inline]
    pub fn id(&self) -> HandleId {
        self.current
    }

    pub fn name(&self) -> &'a str {
        self.handles.get(self.current).map(|h| h.name.as_str()).unwrap_or("")
    }

    pub fn is_created(&self, id: impl Into<HandleId>) -> bool {
        self.handles.get(id.into()).is_some_and(|h| h.created)
    }

    /// 正在创建的句柄的所有依赖
    pub fn dependencies(&self) -> impl Iterator<Item = HandleId> + 'a {
        self.handles.get(self.current).into_iter().flat_map(|h| h.dependencies.iter().copied())
    }

    /// 读取一个已创建的句柄
    ///
    /// 句柄未创建、类型不匹配或者就是正在创建的句柄时返回 None。
    pub fn get<T: HandleResource>(&self, handle: TypedHandle<T>) -> Option<&'a T> {
        let node = self.handles.get(handle.id())?;
        if !node.created {
            return None;
        }
        downcast_ref::<T>(&*node.resource)
    }

    pub fn native<T: NativeResource>(&self, handle: TypedHandle<T>) -> Option<T::Native> {
        self.get(handle).and_then(|resource| resource.native())
    }
}
