//! 安装错误类型
//!
//! 定义安装运行过程中可能发生的错误

use crate::connection::TransportError;
use crate::report::RecordError;
use thiserror::Error;

/// 安装错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    /// 连接断开或无法建立
    #[error("连接错误: {0}")]
    Connection(String),

    /// 命令未在超时内得到期望输出
    #[error("命令超时: `{command}` 超过 {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    /// 设备拒绝命令
    #[error("命令语法错误: {0}")]
    CommandSyntax(String),

    /// 安装操作中止
    #[error("安装操作 {op_id} 已中止")]
    OperationAborted { op_id: String },

    /// 已有安装操作在进行中
    #[error("设备忙: 已有安装操作在进行，无法执行 `{command}`")]
    OperationBusy { command: String },

    /// 输出中找不到操作 ID
    #[error("无法获取操作 ID: `{command}`")]
    OperationIdMissing { command: String },

    /// 操作 ID 一经绑定不可更改
    #[error("操作 ID 不可重新绑定: 已绑定 {bound}，收到 {observed}")]
    OperationIdReassigned { bound: String, observed: String },

    /// 输出与模式不匹配
    #[error("结果匹配失败: {0}")]
    PatternMismatch(String),

    /// 上下文缺少必要参数
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 重启或启动失败
    #[error("重启失败: {0}")]
    ReloadFailed(String),

    /// 设备报告的错误（迁移脚本、FPD 升级等）
    #[error("设备报告错误: {0}")]
    DeviceReported(String),

    /// 结果记录写入失败
    #[error("结果记录错误: {0}")]
    Record(String),
}

impl From<TransportError> for InstallError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout {
                command,
                timeout_ms,
            } => InstallError::CommandTimeout {
                command,
                timeout_ms,
            },
            TransportError::Connection(message) => InstallError::Connection(message),
            TransportError::Closed => InstallError::Connection("连接已关闭".to_string()),
            TransportError::CommandSyntax(message) => InstallError::CommandSyntax(message),
        }
    }
}

impl From<RecordError> for InstallError {
    fn from(error: RecordError) -> Self {
        InstallError::Record(error.to_string())
    }
}

impl InstallError {
    /// 连接类错误，可通过重连恢复
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InstallError::Connection(_) | InstallError::CommandTimeout { .. }
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, InstallError::CommandTimeout { .. })
    }

    /// 获取错误类型字符串
    pub fn error_type(&self) -> &'static str {
        match self {
            InstallError::Connection(_) => "connection_error",
            InstallError::CommandTimeout { .. } => "command_timeout",
            InstallError::CommandSyntax(_) => "command_syntax_error",
            InstallError::OperationAborted { .. } => "operation_aborted",
            InstallError::OperationBusy { .. } => "operation_busy",
            InstallError::OperationIdMissing { .. } => "operation_id_missing",
            InstallError::OperationIdReassigned { .. } => "operation_id_reassigned",
            InstallError::PatternMismatch(_) => "pattern_mismatch",
            InstallError::Configuration(_) => "configuration_error",
            InstallError::ReloadFailed(_) => "reload_failed",
            InstallError::DeviceReported(_) => "device_error",
            InstallError::Record(_) => "record_error",
        }
    }

    /// 记录带上下文的错误日志
    pub fn log_with_context(&self, hostname: &str, plugin: &str) {
        tracing::error!(
            hostname = %hostname,
            plugin = %plugin,
            error_type = %self.error_type(),
            error_message = %self.to_string(),
            "Install plugin failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let error: InstallError = TransportError::Timeout {
            command: "install commit".into(),
            timeout_ms: 100,
        }
        .into();
        assert!(error.is_timeout());
        assert!(error.is_transient());

        let error: InstallError = TransportError::Closed.into();
        assert!(matches!(error, InstallError::Connection(_)));

        let error: InstallError = TransportError::CommandSyntax("bad".into()).into();
        assert!(!error.is_transient());
        assert_eq!(error.error_type(), "command_syntax_error");
    }

    #[test]
    fn test_error_messages() {
        let error = InstallError::OperationBusy {
            command: "install activate id 4".into(),
        };
        assert!(error.to_string().contains("install activate id 4"));
        assert!(!error.is_transient());
    }
}
