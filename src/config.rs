//! 配置管理
//!
//! 引擎时序参数与批量运行参数，支持 YAML / JSON 配置文件。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置文件读取失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML 解析错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),

    #[error("缺少必填参数: {0}")]
    MissingArgument(String),

    #[error("无效的连接地址 {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// 安装引擎时序参数（毫秒）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// 安装命令等待事件的超时
    pub command_timeout_ms: u64,
    /// 确认提示应答后的等待
    pub confirm_timeout_ms: u64,
    /// 进入 / 退出 admin、bash 的超时
    pub shell_timeout_ms: u64,
    /// 每轮轮询前等待成功信息的短超时
    pub quick_catch_ms: u64,
    /// `show install request` 超时
    pub status_query_timeout_ms: u64,
    /// `show install log` 以及 remove 类命令的超时
    pub install_log_timeout_ms: u64,
    /// 连续连接失败允许的重连次数
    pub max_reconnects: u32,
    /// 重连前的退避
    pub reconnect_backoff_ms: u64,
    /// 非控制台连接在重启后首次重连前的等待
    pub reload_grace_ms: u64,
    /// 等待设备重启完成的上限
    pub reload_timeout_ms: u64,
    /// 重启后开始检查模块前的等待
    pub boot_settle_ms: u64,
    /// 模块状态轮询间隔
    pub module_poll_interval_ms: u64,
    /// 模块状态轮询总时长
    pub module_deadline_ms: u64,
    /// `show platform` 超时
    pub platform_query_timeout_ms: u64,
    /// admin 平面重启后检查模块前的等待
    pub admin_settle_ms: u64,
    /// ISSU / admin 重启时查询操作 ID 的次数
    pub op_id_poll_attempts: u32,
    pub op_id_poll_interval_ms: u64,
    /// 自定义命令超时
    pub custom_command_timeout_ms: u64,
    /// 迁移后 reload 的超时
    pub migration_reload_timeout_ms: u64,
    /// FPD 升级开始后首次检查前的等待
    pub fpd_settle_ms: u64,
    pub fpd_poll_interval_ms: u64,
    pub fpd_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 100_000,
            confirm_timeout_ms: 30_000,
            shell_timeout_ms: 30_000,
            quick_catch_ms: 20_000,
            status_query_timeout_ms: 300_000,
            install_log_timeout_ms: 600_000,
            max_reconnects: 3,
            reconnect_backoff_ms: 60_000,
            reload_grace_ms: 60_000,
            reload_timeout_ms: 1_500_000,
            boot_settle_ms: 100_000,
            module_poll_interval_ms: 30_000,
            module_deadline_ms: 3_600_000,
            platform_query_timeout_ms: 600_000,
            admin_settle_ms: 60_000,
            op_id_poll_attempts: 20,
            op_id_poll_interval_ms: 15_000,
            custom_command_timeout_ms: 2_200_000,
            migration_reload_timeout_ms: 3_600_000,
            fpd_settle_ms: 60_000,
            fpd_poll_interval_ms: 30_000,
            fpd_deadline_ms: 9_600_000,
        }
    }
}

impl EngineConfig {
    /// 所有等待归零的配置，用于演练与测试
    ///
    /// 轮询预算保留为很小的次数：模块检查 3 轮，操作 ID 查询 3 次，FPD 检查 3 轮。
    pub fn immediate() -> Self {
        Self {
            reconnect_backoff_ms: 0,
            reload_grace_ms: 0,
            boot_settle_ms: 0,
            module_poll_interval_ms: 0,
            module_deadline_ms: 4,
            admin_settle_ms: 0,
            op_id_poll_attempts: 3,
            op_id_poll_interval_ms: 0,
            fpd_settle_ms: 0,
            fpd_poll_interval_ms: 0,
            fpd_deadline_ms: 4,
            ..Self::default()
        }
    }
}

/// 批量运行配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// XR 主控制台地址（必填）
    #[serde(default)]
    pub xr_active_console: Option<String>,
    #[serde(default)]
    pub xr_standby_console: Vec<String>,
    #[serde(default)]
    pub admin_active_console: Option<String>,
    #[serde(default)]
    pub admin_standby_console: Vec<String>,
    /// 日志根目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 测试用例文件或目录
    #[serde(default)]
    pub tc_loc: Option<PathBuf>,
    /// 并发执行的测试套件数
    #[serde(default = "default_max_parallel_suites")]
    pub max_parallel_suites: usize,
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".installcast")
        .join("logs")
}

fn default_max_parallel_suites() -> usize {
    1
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            xr_active_console: None,
            xr_standby_console: Vec::new(),
            admin_active_console: None,
            admin_standby_console: Vec::new(),
            log_dir: default_log_dir(),
            tc_loc: None,
            max_parallel_suites: default_max_parallel_suites(),
            engine: EngineConfig::default(),
        }
    }
}

impl RunnerConfig {
    /// 从文件加载，按扩展名选择 YAML 或 JSON
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        };
        Ok(config)
    }

    pub fn with_active_console(mut self, url: impl Into<String>) -> Self {
        self.xr_active_console = Some(url.into());
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_tc_loc(mut self, tc_loc: impl Into<PathBuf>) -> Self {
        self.tc_loc = Some(tc_loc.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let active = self
            .xr_active_console
            .as_deref()
            .ok_or_else(|| ConfigError::MissingArgument("xr_active_console".to_string()))?;
        validate_console_url(active)?;

        let others = self
            .xr_standby_console
            .iter()
            .chain(self.admin_active_console.iter())
            .chain(self.admin_standby_console.iter());
        for url in others {
            validate_console_url(url)?;
        }
        Ok(())
    }

    /// 连接跳点：备用控制台在前，主控制台在最后
    pub fn connection_hops(&self) -> Result<Vec<String>, ConfigError> {
        self.validate()?;
        let mut hops = self.xr_standby_console.clone();
        if let Some(active) = &self.xr_active_console {
            hops.push(active.clone());
        }
        Ok(hops)
    }

    /// 从主控制台地址推导主机名
    pub fn hostname(&self) -> Result<String, ConfigError> {
        let active = self
            .xr_active_console
            .as_deref()
            .ok_or_else(|| ConfigError::MissingArgument("xr_active_console".to_string()))?;
        let url = Url::parse(active).map_err(|e| ConfigError::InvalidUrl {
            url: active.to_string(),
            reason: e.to_string(),
        })?;
        Ok(url.host_str().unwrap_or(active).to_string())
    }
}

/// 控制台地址只接受 telnet / ssh
pub fn validate_console_url(value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        url: value.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "telnet" | "ssh" => {}
        other => {
            return Err(ConfigError::InvalidUrl {
                url: value.to_string(),
                reason: format!("不支持的协议 {other}"),
            })
        }
    }

    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            url: value.to_string(),
            reason: "缺少主机".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_reconnects, 3);
        assert_eq!(config.reconnect_backoff_ms, 60_000);
        assert_eq!(config.module_deadline_ms, 3_600_000);
        assert_eq!(config.reload_timeout_ms, 1_500_000);
    }

    #[test]
    fn test_immediate_has_no_sleeps() {
        let config = EngineConfig::immediate();
        assert_eq!(config.reconnect_backoff_ms, 0);
        assert_eq!(config.boot_settle_ms, 0);
        assert_eq!(config.module_poll_interval_ms, 0);
        assert_eq!(config.max_reconnects, 3);
    }

    #[test]
    fn test_console_url_validation() {
        assert!(validate_console_url("telnet://admin:pw@10.0.0.1:2033").is_ok());
        assert!(validate_console_url("ssh://10.0.0.1").is_ok());
        assert!(matches!(
            validate_console_url("http://10.0.0.1"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(validate_console_url("not a url").is_err());
    }

    #[test]
    fn test_missing_active_console() {
        let config = RunnerConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_connection_hops_order() {
        let mut config = RunnerConfig::default().with_active_console("telnet://10.0.0.1:2001");
        config.xr_standby_console = vec!["telnet://10.0.0.2:2002".to_string()];

        let hops = config.connection_hops().unwrap();
        assert_eq!(hops, vec!["telnet://10.0.0.2:2002", "telnet://10.0.0.1:2001"]);
        assert_eq!(config.hostname().unwrap(), "10.0.0.1");
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "xr_active_console: telnet://10.1.1.1:2040\nmax_parallel_suites: 4\nengine:\n  max_reconnects: 5"
        )
        .unwrap();

        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.max_parallel_suites, 4);
        assert_eq!(config.engine.max_reconnects, 5);
        assert_eq!(config.engine.quick_catch_ms, 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"xr_active_console": "ssh://r1", "tc_loc": "/tmp/tc"}}"#).unwrap();

        let config = RunnerConfig::load(file.path()).unwrap();
        assert_eq!(config.tc_loc, Some(PathBuf::from("/tmp/tc")));
        assert_eq!(config.max_parallel_suites, 1);
    }
}
