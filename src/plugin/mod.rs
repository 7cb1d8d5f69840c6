//! 插件系统模块
//!
//! 提供按能力选择的安装插件：
//! - 插件描述（平台 / 阶段 / 系统类型，空集合表示不限）
//! - 按标准阶段顺序分派
//! - 插件失败隔离，失败后继续执行后续插件

mod registry;
mod types;

pub use registry::PluginRegistry;
pub use types::{
    InstallPlugin, Phase, PluginDescriptor, PluginError, PluginFilter, PluginRunResult,
};

#[cfg(test)]
pub(crate) use registry::testing;

#[cfg(test)]
mod tests;
