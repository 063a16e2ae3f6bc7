//! Truvis 工具集
//!
//! 提供各个 crate 共享的日志初始化。

pub mod init_log;
