//! HandleGraph 的配置
//!
//! 可以直接用 `Default`，也可以从 TOML 加载：
//!
//! ```toml
//! failure_policy = "proceed"
//! validate_edges = false
//! ```

use serde::Deserialize;

use crate::error::{HandleError, HandleResult};

/// 依赖创建失败时，dependent 的处理策略
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    /// 有任意依赖未能创建时，跳过当前句柄的创建，保持 UNCREATED
    #[default]
    ShortCircuit,
    /// 忽略依赖的失败，仍然调用当前句柄的创建过程
    Proceed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HandleGraphSettings {
    pub failure_policy: DependencyFailurePolicy,

    /// 在 `add_dependency` 时检查自环和环
    ///
    /// 关闭后只能依靠创建时的重入检查来发现环。
    pub validate_edges: bool,
}

impl Default for HandleGraphSettings {
    fn default() -> Self {
        Self {
            failure_policy: DependencyFailurePolicy::default(),
            validate_edges: true,
        }
    }
}

impl HandleGraphSettings {
    pub fn from_toml_str(text: &str) -> HandleResult<Self> {
        toml::from_str(text).map_err(|e| HandleError::Settings(e.to_string()))
    }

    pub fn with_failure_policy(mut self, failure_policy: DependencyFailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_validate_edges(mut self, validate_edges: bool) -> Self {
        self.validate_edges = validate_edges;
        self
    }
}
