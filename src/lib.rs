//! installcast
//!
//! 通过设备控制台驱动网络设备软件安装的完整流程：
//! add / prepare / activate / deactivate / commit / remove / extract / migrate。
//! 插件按平台、阶段和系统类型选择，安装引擎负责解析输出、跟踪后台操作和等待重启，
//! 结果写入每个测试用例的 `result.log`。

pub mod config;
pub mod connection;
pub mod context;
pub mod engine;
pub mod logger;
pub mod operations;
pub mod plugin;
pub mod report;
pub mod resilience;
pub mod suite;

pub use config::{ConfigError, EngineConfig, RunnerConfig};
pub use connection::{Connection, ScriptedConnection, ScriptedStep, TransportError};
pub use context::{RunContext, ShellMode};
pub use engine::{InstallEngine, InstallError, OperationId, OperationOutcome};
pub use plugin::{InstallPlugin, Phase, PluginDescriptor, PluginFilter, PluginRegistry};
pub use report::{PatternSpec, ResultRecord, TestStatus};
pub use suite::{BatchRunner, ConnectionFactory, SuiteReport};
