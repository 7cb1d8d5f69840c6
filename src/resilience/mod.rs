//! 容错机制模块
//!
//! 轮询过程中连接中断后的有限次重连

mod reconnect;

pub use reconnect::{ReconnectBudget, ReconnectConfig, ReconnectPolicy};
