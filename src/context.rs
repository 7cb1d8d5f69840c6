//! 运行上下文
//!
//! 一次安装运行（批量模式下为一个测试用例）的全部可变状态。
//! 插件与引擎通过 `&mut RunContext` 读写，不存在共享所有权。

use crate::config::EngineConfig;
use crate::engine::{InstallError, OperationId};
use crate::logger::RunLogger;
use crate::plugin::Phase;
use crate::report::PatternSpec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 命令执行所在的 shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShellMode {
    #[serde(alias = "XR", alias = "user")]
    User,
    #[serde(alias = "AdminBash", alias = "admin")]
    Admin,
    #[serde(alias = "bash")]
    Bash,
}

impl ShellMode {
    /// 进入该 shell 的命令
    pub fn enter_command(self) -> Option<&'static str> {
        match self {
            ShellMode::User => None,
            ShellMode::Admin => Some("admin"),
            ShellMode::Bash => Some("run"),
        }
    }

    pub fn exit_command(self) -> Option<&'static str> {
        match self {
            ShellMode::User => None,
            ShellMode::Admin | ShellMode::Bash => Some("exit"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShellMode::User => "User",
            ShellMode::Admin => "Admin",
            ShellMode::Bash => "Bash",
        }
    }
}

impl fmt::Display for ShellMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ShellMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" | "xr" => Ok(ShellMode::User),
            "admin" | "adminbash" => Ok(ShellMode::Admin),
            "bash" => Ok(ShellMode::Bash),
            _ => Err(format!("未知的 shell: {s}")),
        }
    }
}

/// 操作完成后追加执行的检查命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "NextLevelEntry")]
pub struct NextLevelCommand {
    pub command: String,
    pub pattern: PatternSpec,
}

/// 既接受纯字符串，也接受 `{command, pattern}` 对象
#[derive(Deserialize)]
#[serde(untagged)]
enum NextLevelEntry {
    Plain(String),
    Detailed {
        command: String,
        #[serde(default)]
        pattern: PatternSpec,
    },
}

impl From<NextLevelEntry> for NextLevelCommand {
    fn from(entry: NextLevelEntry) -> Self {
        match entry {
            NextLevelEntry::Plain(command) => NextLevelCommand::new(command),
            NextLevelEntry::Detailed { command, pattern } => NextLevelCommand { command, pattern },
        }
    }
}

impl NextLevelCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            pattern: PatternSpec::unspecified(),
        }
    }

    pub fn with_pattern(mut self, pattern: PatternSpec) -> Self {
        self.pattern = pattern;
        self
    }
}

/// 补充命令的判定结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextLevelResult {
    pub command: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub hostname: String,
    /// 连接跳点，最后一个为目标设备
    pub host_urls: Vec<String>,
    pub shell: Option<ShellMode>,
    pub family: Option<String>,
    pub os_type: Option<String>,
    pub requested_phase: Option<Phase>,
    pub software_packages: Vec<String>,
    pub package_ids: Vec<String>,
    pub server_repository_url: Option<String>,
    pub pattern: PatternSpec,
    pub next_level: Vec<NextLevelCommand>,
    pub next_level_shell: Option<ShellMode>,
    pub custom_commands: Vec<String>,
    pub issu_mode: bool,
    /// 最近一次解析到的操作 ID
    pub operation_id: Option<OperationId>,
    pub operation_history: Vec<OperationId>,
    pub log_directory: PathBuf,
    pub tc_id: Option<usize>,
    pub tc_name: Option<String>,
    /// 任一插件失败后置为 false
    pub success: bool,
    pub last_status: Option<String>,
    pub next_level_results: Vec<NextLevelResult>,
    pub config: EngineConfig,
    logger: RunLogger,
}

impl RunContext {
    pub fn new(hostname: impl Into<String>, log_directory: impl Into<PathBuf>) -> Self {
        let log_directory = log_directory.into();
        let logger = RunLogger::new(&log_directory);
        Self::with_logger(hostname, log_directory, logger)
    }

    /// 不写文件的上下文
    pub fn in_memory(hostname: impl Into<String>, log_directory: impl Into<PathBuf>) -> Self {
        Self::with_logger(hostname, log_directory.into(), RunLogger::in_memory())
    }

    fn with_logger(hostname: impl Into<String>, log_directory: PathBuf, logger: RunLogger) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.into(),
            host_urls: Vec::new(),
            shell: None,
            family: None,
            os_type: None,
            requested_phase: None,
            software_packages: Vec::new(),
            package_ids: Vec::new(),
            server_repository_url: None,
            pattern: PatternSpec::unspecified(),
            next_level: Vec::new(),
            next_level_shell: None,
            custom_commands: Vec::new(),
            issu_mode: false,
            operation_id: None,
            operation_history: Vec::new(),
            log_directory,
            tc_id: None,
            tc_name: None,
            success: true,
            last_status: None,
            next_level_results: Vec::new(),
            config: EngineConfig::default(),
            logger,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_shell(mut self, shell: ShellMode) -> Self {
        self.shell = Some(shell);
        self
    }

    pub fn with_platform(mut self, family: impl Into<String>, os_type: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self.os_type = Some(os_type.into());
        self
    }

    /// shell 未设置时拒绝执行任何命令
    pub fn require_shell(&self) -> Result<ShellMode, InstallError> {
        self.shell
            .ok_or_else(|| InstallError::Configuration("Please specify shell".to_string()))
    }

    pub fn log_directory(&self) -> &Path {
        &self.log_directory
    }

    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    pub fn packages_joined(&self) -> String {
        self.software_packages.join(" ")
    }

    pub fn package_ids_joined(&self) -> String {
        self.package_ids.join(" ")
    }

    /// 更新当前状态并写入日志
    pub fn post_status(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[STATUS] {}: {}", self.hostname, message);
        self.logger.add("status", &message);
        self.last_status = Some(message);
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        tracing::info!("[{}] {}", self.hostname, message.as_ref());
        self.logger.add("info", message.as_ref());
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        tracing::warn!("[{}] {}", self.hostname, message.as_ref());
        self.logger.add("warning", message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        tracing::error!("[{}] {}", self.hostname, message.as_ref());
        self.logger.add("error", message.as_ref());
    }

    pub fn record_operation_id(&mut self, id: OperationId) {
        self.operation_history.push(id.clone());
        self.operation_id = Some(id);
    }

    pub fn record_next_level(&mut self, result: NextLevelResult) {
        self.next_level_results.push(result);
    }

    /// 批量模式 `save_data` 可引用的字段
    pub fn saved_value(&self, field: &str) -> Option<String> {
        match field {
            "operation_id" | "op_id" | "resid" => self.operation_id.as_ref().map(|id| id.to_string()),
            "hostname" => Some(self.hostname.clone()),
            "tc_name" => self.tc_name.clone(),
            "last_status" => self.last_status.clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_shell() {
        let ctx = RunContext::in_memory("r1", "/tmp/x");
        assert!(matches!(
            ctx.require_shell(),
            Err(InstallError::Configuration(_))
        ));
        let ctx = ctx.with_shell(ShellMode::Admin);
        assert_eq!(ctx.require_shell().unwrap(), ShellMode::Admin);
    }

    #[test]
    fn test_shell_mode_parsing() {
        assert_eq!("Admin".parse::<ShellMode>().unwrap(), ShellMode::Admin);
        assert_eq!("AdminBash".parse::<ShellMode>().unwrap(), ShellMode::Admin);
        assert_eq!("XR".parse::<ShellMode>().unwrap(), ShellMode::User);
        assert!("cli".parse::<ShellMode>().is_err());

        let shell: ShellMode = serde_json::from_str("\"Bash\"").unwrap();
        assert_eq!(shell.enter_command(), Some("run"));
        assert_eq!(ShellMode::User.exit_command(), None);
    }

    #[test]
    fn test_next_level_forms() {
        let entries: Vec<NextLevelCommand> = serde_json::from_str(
            r#"["show install active", {"command": "show version", "pattern": ["6\\.5\\.1"]}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].command, "show install active");
        assert!(entries[0].pattern.is_unspecified());
        assert_eq!(entries[1].pattern.pass, vec!["6\\.5\\.1".to_string()]);
    }

    #[test]
    fn test_status_and_operation_history() {
        let mut ctx = RunContext::in_memory("r1", "/tmp/x");
        ctx.post_status("Install operation 4 started");
        ctx.record_operation_id(OperationId::User(4));
        ctx.record_operation_id(OperationId::User(5));

        assert_eq!(ctx.last_status.as_deref(), Some("Install operation 4 started"));
        assert_eq!(ctx.operation_history.len(), 2);
        assert_eq!(ctx.saved_value("op_id").as_deref(), Some("5"));
        assert_eq!(ctx.saved_value("unknown"), None);
        assert!(ctx.success);
    }
}
