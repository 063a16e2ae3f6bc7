//! 带类型的句柄
//!
//! `TypedHandle<T>` 只是 `HandleId` 加上资源类型，可以 Copy，不拥有资源。
//! 通过 `HandleGraph` 访问资源时有两类接口：
//!
//! - `get_or_create` / `native`: 未创建时先 create（会连带创建整条依赖链）
//! - `get` / `peek_native`: 纯读取，没有副作用

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use crate::error::{HandleError, HandleResult};
use crate::graph::HandleGraph;
use crate::handle::{HandleId, HandleResource, downcast_mut, downcast_ref};

/// 持有原生句柄（例如 `vk::Device`、`vk::SwapchainKHR`）的资源
pub trait NativeResource: HandleResource {
    type Native: Copy;

    /// 未创建时返回 None
    fn native(&self) -> Option<Self::Native>;
}

pub struct TypedHandle<T> {
    id: HandleId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedHandle<T> {
    #[inline]
    pub(crate) fn new(id: HandleId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }
}

impl<T> Clone for TypedHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for TypedHandle<T> {}

impl<T> PartialEq for TypedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for TypedHandle<T> {}

impl<T> Hash for TypedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for TypedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "TypedHandle<{}>({:?})", type_name, self.id)
    }
}

impl<T> From<TypedHandle<T>> for HandleId {
    #[inline]
    fn from(handle: TypedHandle<T>) -> Self {
        handle.id
    }
}

// typed access
impl HandleGraph {
    /// 读取资源，不会触发创建
    pub fn get<T: HandleResource>(&self, handle: TypedHandle<T>) -> Option<&T> {
        let node = self.handle(handle.id)?;
        downcast_ref::<T>(node.resource())
    }

    /// 可变地读取资源，不会触发创建
    ///
    /// 常用于在 recreate 之前更新资源的参数（例如 resize 后的新尺寸）。
    pub fn get_mut<T: HandleResource>(&mut self, handle: TypedHandle<T>) -> Option<&mut T> {
        let node = self.handle_mut(handle.id)?;
        downcast_mut::<T>(&mut *node.resource)
    }

    /// 确保资源已创建，然后返回它
    ///
    /// 资源（或者它的依赖）创建失败时返回 `HandleError::NotCreated`。
    pub fn get_or_create<T: HandleResource>(&mut self, handle: TypedHandle<T>) -> HandleResult<&T> {
        if !self.ensure_created(handle.id)? {
            return Err(HandleError::NotCreated {
                name: self.name(handle.id).unwrap_or_default().to_string(),
            });
        }
        self.get(handle).ok_or_else(|| HandleError::TypeMismatch {
            name: self.name(handle.id).unwrap_or_default().to_string(),
        })
    }

    /// 确保资源已创建，然后返回原生句柄
    pub fn native<T: NativeResource>(&mut self, handle: TypedHandle<T>) -> HandleResult<T::Native> {
        let resource = self.get_or_create(handle)?;
        match resource.native() {
            Some(native) => Ok(native),
            None => Err(HandleError::NotCreated {
                name: self.name(handle.id).unwrap_or_default().to_string(),
            }),
        }
    }

    /// 直接读取原生句柄，不会触发创建
    pub fn peek_native<T: NativeResource>(&self, handle: TypedHandle<T>) -> Option<T::Native> {
        self.get(handle).and_then(|resource| resource.native())
    }
}
