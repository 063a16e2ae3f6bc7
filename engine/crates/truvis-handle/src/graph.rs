//! 句柄依赖图
//!
//! 所有句柄存放在一个 SlotMap 中，依赖边用 `HandleId` 表示。
//!
//! # create 的流程
//!
//! 1. 收集当前处于 CREATED 状态的 dependents（传递闭包），必须在销毁之前收集，
//!    因为第 2 步会级联销毁它们
//! 2. 如果自身已创建，先销毁（连带 dependents）。create 总是完整重建
//! 3. 创建所有未创建的依赖
//! 4. 重入检查：创建依赖时回到了自身，说明存在环
//! 5. 调用资源自身的 `create_impl`
//! 6. 按依赖顺序重建第 1 步收集的 dependents
//!
//! 同一次顶层 create 中创建失败过的句柄不会再次调用 `create_impl`。
//!
//! # destroy 的流程
//!
//! 先递归销毁所有 dependents，再销毁自身。依赖不受影响。

use std::collections::HashSet;

use slotmap::SlotMap;

use crate::error::{HandleError, HandleResult};
use crate::handle::{HandleContext, HandleId, HandleResource, ResourceHandle, VacantResource};
use crate::settings::{DependencyFailurePolicy, HandleGraphSettings};
use crate::typed::TypedHandle;

/// 资源句柄的 arena
///
/// 句柄的生命周期由 graph 管理：`remove` 或者 graph 被 drop 时，
/// 仍处于 CREATED 状态的资源都会被销毁。
pub struct HandleGraph {
    handles: SlotMap<HandleId, ResourceHandle>,
    settings: HandleGraphSettings,

    /// 嵌套 create 的深度，回到 0 时清空 `failed_in_pass`
    create_depth: usize,
    failed_in_pass: HashSet<HandleId>,
}

impl Default for HandleGraph {
    fn default() -> Self {
        Self::new()
    }
}

// new & init
impl HandleGraph {
    pub fn new() -> Self {
        Self::with_settings(HandleGraphSettings::default())
    }

    pub fn with_settings(settings: HandleGraphSettings) -> Self {
        Self {
            handles: SlotMap::with_key(),
            settings,
            create_depth: 0,
            failed_in_pass: HashSet::new(),
        }
    }

    #[inline]
    pub fn settings(&self) -> &HandleGraphSettings {
        &self.settings
    }
}

// register & remove
impl HandleGraph {
    /// 注册一个句柄，初始为 UNCREATED，没有任何边
    pub fn insert(&mut self, name: impl Into<String>, resource: impl HandleResource) -> HandleId {
        self.insert_boxed(name, Box::new(resource))
    }

    pub fn insert_boxed(&mut self, name: impl Into<String>, resource: Box<dyn HandleResource>) -> HandleId {
        let name = name.into();
        log::debug!("register handle `{}`", name);
        self.handles.insert(ResourceHandle::new(name, resource))
    }

    pub fn insert_typed<T: HandleResource>(&mut self, name: impl Into<String>, resource: T) -> TypedHandle<T> {
        TypedHandle::new(self.insert(name, resource))
    }

    /// 注册一个新句柄，并复制 `template` 的所有依赖
    ///
    /// 新句柄没有 dependents，因此复制依赖不会形成环。
    pub fn insert_like<T: HandleResource>(
        &mut self,
        template: impl Into<HandleId>,
        name: impl Into<String>,
        resource: T,
    ) -> HandleResult<TypedHandle<T>> {
        let template = template.into();
        let dependencies: Vec<HandleId> = self.node(template)?.dependencies.iter().copied().collect();

        let id = self.insert(name, resource);
        for dependency in dependencies {
            self.link(id, dependency);
        }
        Ok(TypedHandle::new(id))
    }

    /// 移除句柄
    ///
    /// 先销毁它（以及它的 dependents），再切断所有指向它的边，最后归还资源对象。
    pub fn remove(&mut self, id: impl Into<HandleId>) -> HandleResult<Box<dyn HandleResource>> {
        let id = id.into();
        self.destroy(id)?;

        let node = self.handles.remove(id).ok_or(HandleError::UnknownHandle(id))?;
        // add_dependent 建立的单向边只记录在一侧，所以需要扫描所有句柄
        for (_, other) in self.handles.iter_mut() {
            other.dependencies.shift_remove(&id);
            other.dependents.shift_remove(&id);
        }

        log::debug!("remove handle `{}`", node.name);
        Ok(node.resource)
    }
}

// edges
impl HandleGraph {
    /// `this` 依赖 `other`：创建 `this` 前会先创建 `other`，销毁 `other` 时会先销毁 `this`
    pub fn add_dependency(&mut self, this: impl Into<HandleId>, other: impl Into<HandleId>) -> HandleResult<()> {
        let (this, other) = (this.into(), other.into());
        self.node(this)?;
        self.node(other)?;

        if self.settings.validate_edges && (this == other || self.reaches_via_dependents(this, other)) {
            let err = HandleError::DependencyCycle {
                from: self.name_or_default(this),
                to: self.name_or_default(other),
            };
            log::error!("{}", err);
            return Err(err);
        }

        self.link(this, other);
        Ok(())
    }

    /// 删除 `this` 对 `other` 的依赖，两侧的边都会被删除；边不存在时什么也不做
    pub fn remove_dependency(&mut self, this: impl Into<HandleId>, other: impl Into<HandleId>) {
        let (this, other) = (this.into(), other.into());
        if let Some(node) = self.handles.get_mut(other) {
            node.dependents.shift_remove(&this);
        }
        if let Some(node) = self.handles.get_mut(this) {
            node.dependencies.shift_remove(&other);
        }
    }

    /// 只在 `this` 一侧记录 dependent
    ///
    /// `dependent` 会随 `this` 一起被销毁和重建，但创建 `dependent` 时不会去创建 `this`。
    pub fn add_dependent(&mut self, this: impl Into<HandleId>, dependent: impl Into<HandleId>) -> HandleResult<()> {
        let (this, dependent) = (this.into(), dependent.into());
        self.node(dependent)?;

        if self.settings.validate_edges && (this == dependent || self.reaches_via_dependents(dependent, this)) {
            let err = HandleError::DependencyCycle {
                from: self.name_or_default(dependent),
                to: self.name_or_default(this),
            };
            log::error!("{}", err);
            return Err(err);
        }

        self.node_mut(this)?.dependents.insert(dependent);
        Ok(())
    }

    /// 只从 `this` 一侧删除 dependent；不存在时什么也不做
    pub fn remove_dependent(&mut self, this: impl Into<HandleId>, dependent: impl Into<HandleId>) {
        let dependent = dependent.into();
        if let Some(node) = self.handles.get_mut(this.into()) {
            node.dependents.shift_remove(&dependent);
        }
    }

    fn link(&mut self, this: HandleId, other: HandleId) {
        if let Some(node) = self.handles.get_mut(other) {
            node.dependents.insert(this);
        }
        if let Some(node) = self.handles.get_mut(this) {
            node.dependencies.insert(other);
        }
        log::debug!(
            "dependency `{}` -> `{}`",
            self.name_or_default(this),
            self.name_or_default(other)
        );
    }

    /// 沿 dependents 方向，从 `from` 出发能否到达 `to`
    fn reaches_via_dependents(&self, from: HandleId, to: HandleId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Some(node) = self.handles.get(id) {
                stack.extend(node.dependents.iter().copied());
            }
        }
        false
    }
}

// lifecycle
impl HandleGraph {
    /// 创建句柄；已创建时会连同 dependents 一起重建
    ///
    /// 返回句柄最终是否处于 CREATED 状态。
    pub fn create(&mut self, id: impl Into<HandleId>) -> HandleResult<bool> {
        let id = id.into();
        self.create_depth += 1;
        let result = self.create_in_pass(id);
        self.create_depth -= 1;
        if self.create_depth == 0 {
            self.failed_in_pass.clear();
        }
        result
    }

    fn create_in_pass(&mut self, id: HandleId) -> HandleResult<bool> {
        let node = self.node(id)?;
        if node.creating {
            let err = HandleError::CreationCycle {
                name: node.name.clone(),
            };
            log::error!("{}", err);
            return Err(err);
        }

        let active_dependents = self.collect_active_dependents(id);

        self.destroy(id)?;

        self.node_mut(id)?.creating = true;
        let result = self.create_dependencies_then_self(id);
        self.node_mut(id)?.creating = false;
        let created = result?;
        if !created {
            self.failed_in_pass.insert(id);
        }

        for dependent in active_dependents {
            if !self.is_created(dependent) {
                self.create(dependent)?;
            }
        }

        Ok(created)
    }

    /// 未创建时才创建
    pub fn ensure_created(&mut self, id: impl Into<HandleId>) -> HandleResult<bool> {
        let id = id.into();
        if self.node(id)?.created {
            return Ok(true);
        }
        self.create(id)
    }

    /// 销毁句柄及其所有 dependents；未创建的句柄不会调用 `destroy_impl`
    pub fn destroy(&mut self, id: impl Into<HandleId>) -> HandleResult<()> {
        let id = id.into();
        let node = self.node_mut(id)?;
        if node.destroying {
            return Ok(());
        }
        node.destroying = true;
        let dependents: Vec<HandleId> = node.dependents.iter().copied().collect();

        let mut result = Ok(());
        for dependent in dependents {
            if let Err(err) = self.destroy(dependent) {
                result = Err(err);
                break;
            }
        }

        let node = self.node_mut(id)?;
        node.destroying = false;
        result?;

        if node.created {
            log::debug!("destroy `{}`", node.name);
            node.resource.destroy_impl();
            node.created = false;
        }
        Ok(())
    }

    /// 销毁所有句柄
    pub fn destroy_all(&mut self) {
        let ids: Vec<HandleId> = self.handles.keys().collect();
        for id in ids {
            if let Err(err) = self.destroy(id) {
                log::error!("failed to destroy handle: {}", err);
            }
        }
    }

    fn create_dependencies_then_self(&mut self, id: HandleId) -> HandleResult<bool> {
        let dependencies: Vec<HandleId> = self.node(id)?.dependencies.iter().copied().collect();
        for &dependency in &dependencies {
            if !self.is_created(dependency) && !self.failed_in_pass.contains(&dependency) {
                self.create(dependency)?;
            }
        }

        if let Some(&missing) = dependencies.iter().find(|&&dependency| !self.is_created(dependency)) {
            match self.settings.failure_policy {
                DependencyFailurePolicy::ShortCircuit => {
                    log::warn!(
                        "skip creating `{}`: dependency `{}` is not created",
                        self.name_or_default(id),
                        self.name_or_default(missing)
                    );
                    return Ok(false);
                }
                DependencyFailurePolicy::Proceed => {
                    log::warn!(
                        "creating `{}` although dependency `{}` is not created",
                        self.name_or_default(id),
                        self.name_or_default(missing)
                    );
                }
            }
        }

        let node = self.node_mut(id)?;
        if node.created {
            let err = HandleError::CreationCycle {
                name: node.name.clone(),
            };
            log::error!("{}", err);
            return Err(err);
        }

        let vacant: Box<dyn HandleResource> = Box::new(VacantResource);
        let mut resource = std::mem::replace(&mut node.resource, vacant);
        let created = resource.create_impl(&HandleContext::new(&self.handles, id));

        let node = self.node_mut(id)?;
        node.resource = resource;
        node.created = created;
        if created {
            log::debug!("create `{}`", node.name);
        } else {
            log::warn!("failed to create `{}`", node.name);
        }
        Ok(created)
    }

    /// 当前处于 CREATED 状态的所有 dependents（传递闭包，不含自身）
    ///
    /// 按依赖顺序排列：每个句柄都排在它的 dependents 之前。
    fn collect_active_dependents(&self, root: HandleId) -> Vec<HandleId> {
        let mut visited = HashSet::new();
        let mut post_order = Vec::new();
        self.visit_dependents(root, &mut visited, &mut post_order);

        post_order
            .into_iter()
            .rev()
            .filter(|&id| id != root && self.is_created(id))
            .collect()
    }

    fn visit_dependents(&self, id: HandleId, visited: &mut HashSet<HandleId>, post_order: &mut Vec<HandleId>) {
        if !visited.insert(id) {
            return;
        }
        if let Some(node) = self.handles.get(id) {
            for &dependent in &node.dependents {
                self.visit_dependents(dependent, visited, post_order);
            }
        }
        post_order.push(id);
    }
}

// getters
impl HandleGraph {
    /// 未知的句柄视为未创建
    #[inline]
    pub fn is_created(&self, id: impl Into<HandleId>) -> bool {
        self.handles.get(id.into()).is_some_and(|node| node.created)
    }

    #[inline]
    pub fn contains(&self, id: impl Into<HandleId>) -> bool {
        self.handles.contains_key(id.into())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn name(&self, id: impl Into<HandleId>) -> Option<&str> {
        self.handles.get(id.into()).map(|node| node.name.as_str())
    }

    #[inline]
    pub fn handle(&self, id: impl Into<HandleId>) -> Option<&ResourceHandle> {
        self.handles.get(id.into())
    }

    #[inline]
    pub(crate) fn handle_mut(&mut self, id: impl Into<HandleId>) -> Option<&mut ResourceHandle> {
        self.handles.get_mut(id.into())
    }

    pub fn dependencies(&self, id: impl Into<HandleId>) -> impl Iterator<Item = HandleId> + '_ {
        self.handles.get(id.into()).into_iter().flat_map(|node| node.dependencies.iter().copied())
    }

    pub fn dependents(&self, id: impl Into<HandleId>) -> impl Iterator<Item = HandleId> + '_ {
        self.handles.get(id.into()).into_iter().flat_map(|node| node.dependents.iter().copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &ResourceHandle)> {
        self.handles.iter()
    }

    fn node(&self, id: HandleId) -> HandleResult<&ResourceHandle> {
        self.handles.get(id).ok_or(HandleError::UnknownHandle(id))
    }

    fn node_mut(&mut self, id: HandleId) -> HandleResult<&mut ResourceHandle> {
        self.handles.get_mut(id).ok_or(HandleError::UnknownHandle(id))
    }

    fn name_or_default(&self, id: HandleId) -> String {
        self.name(id).unwrap_or("<removed>").to_string()
    }
}

impl Drop for HandleGraph {
    fn drop(&mut self) {
        let created = self.handles.values().filter(|node| node.created).count();
        if created > 0 {
            log::debug!("HandleGraph drop: releasing {} created handles", created);
        }
        self.destroy_all();
    }
}
