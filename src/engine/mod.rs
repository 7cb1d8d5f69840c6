//! 安装操作引擎
//!
//! 安装命令状态机、异步操作监视、重启等待以及相关错误类型。

mod error;
mod events;
mod machine;
mod operation;
mod platform;
mod reload;
mod watcher;


pub use error::InstallError;
pub use events::InstallEvent;
pub use machine::InstallEngine;
pub use operation::{
    install_log_query, status_query, Operation, OperationId, OperationOutcome, OperationState,
    Plane,
};
pub use platform::{
    ModuleRow, ModuleTable, FULLY_BOOTED_STATE, PLATFORM_QUERY, VALID_MODULE_STATES,
};
pub use reload::ReloadWaiter;
pub use watcher::{OperationWatcher, WatchMode, WatchSummary, NO_OPERATION_IN_PROGRESS};
