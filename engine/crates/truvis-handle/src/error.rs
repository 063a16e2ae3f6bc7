use crate::handle::HandleId;

/// 句柄依赖图的错误类型
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// key 已经被移除，或者来自另一个 graph
    #[error("unknown handle {0:?}")]
    UnknownHandle(HandleId),

    /// 创建依赖的过程中又回到了正在创建的句柄上，说明依赖图中存在环
    #[error("handle `{name}` was re-entered while it was being created (dependency cycle)")]
    CreationCycle { name: String },

    /// 添加这条依赖边会形成环
    #[error("adding dependency `{from}` -> `{to}` would form a cycle")]
    DependencyCycle { from: String, to: String },

    /// 句柄的创建过程失败，或者因为依赖未创建而被跳过
    #[error("handle `{name}` is not created")]
    NotCreated { name: String },

    /// TypedHandle 指向的资源类型与实际存储的不一致
    #[error("handle `{name}` does not hold the requested resource type")]
    TypeMismatch { name: String },

    #[error("shared registry: {0}")]
    Registry(String),

    #[error("invalid handle graph settings: {0}")]
    Settings(String),
}

pub type HandleResult<T> = Result<T, HandleError>;
