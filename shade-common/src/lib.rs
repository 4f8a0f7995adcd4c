//! shade通用库
//!
//! 提供沙箱运行时各个crate共享的日志初始化、配置模型和工具函数

pub mod config;
pub mod logging;
pub mod utils;

// 重新导出主要类型
pub use config::{
    ConfigOverrides, DEFAULT_SDK, LooperMode, MAX_SDK, MIN_SDK, SandboxConfig, SandboxReuse,
};
pub use utils::*;
