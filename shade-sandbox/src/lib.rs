//! shade沙箱库
//!
//! 沙箱生命周期、每测试重置与沙箱复用。
//!
//! An [`Environment`] collects class definitions and shadows. A [`Sandbox`]
//! is one runtime generation built from it for a given configuration, and a
//! [`SandboxManager`] caches sandboxes so that tests with the same
//! configuration share one.

pub mod environment;
pub mod manager;
pub mod sandbox;

// 重新导出主要类型
pub use environment::{Environment, EnvironmentBuilder};
pub use manager::SandboxManager;
pub use sandbox::{Sandbox, TestContext};
