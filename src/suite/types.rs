//! 测试用例文件
//!
//! 每个 JSON 文件是一个测试套件，内容为测试用例数组。

use crate::config::{ConfigError, EngineConfig};
use crate::context::{NextLevelCommand, RunContext, ShellMode};
use crate::engine::OperationId;
use crate::operations::{plugin_for_operation, CUSTOM_COMMANDS_PLUGIN};
use crate::report::{PatternSpec, RecordError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 套件副本文件名，`save_data` 会改写它
pub const TC_FILE_NAME: &str = "tc.json";
pub const JUNIT_FILE_NAME: &str = "junit.xml";

#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("测试用例文件读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("测试用例文件 {path} 解析失败: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0} 中没有测试用例")]
    NoTestCases(PathBuf),

    #[error("未知的操作: {0}")]
    UnknownOperation(String),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// JSON 中既可能是数字也可能是字符串的值
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(i64),
    Text(String),
}

impl Scalar {
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.trim().to_string(),
        }
    }
}

/// 单个值或数组
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScalarList {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl ScalarList {
    pub fn to_strings(&self) -> Vec<String> {
        let items: Vec<String> = match self {
            ScalarList::One(value) => vec![value.as_text()],
            ScalarList::Many(values) => values.iter().map(Scalar::as_text).collect(),
        };
        items.into_iter().filter(|s| !s.is_empty() && s != "0").collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCaseSpec {
    #[serde(rename = "TC", default)]
    pub name: String,
    #[serde(default)]
    pub shell: Option<ShellMode>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub command: Option<ScalarList>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub pattern: PatternSpec,
    #[serde(default)]
    pub nextlevel: Vec<NextLevelCommand>,
    #[serde(default)]
    pub nextlevel_shell: Option<ShellMode>,
    /// 已有的操作 ID，0 表示没有
    #[serde(default)]
    pub resid: Option<Scalar>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub pkg_id: Option<ScalarList>,
    /// 上下文字段名 -> 要在 tc.json 中替换的占位文本
    #[serde(default)]
    pub save_data: IndexMap<String, String>,
}

impl TestCaseSpec {
    pub fn commands(&self) -> Vec<String> {
        self.command
            .as_ref()
            .map(ScalarList::to_strings)
            .unwrap_or_default()
    }

    pub fn package_ids(&self) -> Vec<String> {
        self.pkg_id
            .as_ref()
            .map(ScalarList::to_strings)
            .unwrap_or_default()
    }

    pub fn operation_id(&self) -> Option<OperationId> {
        let token = self.resid.as_ref()?.as_text();
        if token.is_empty() || token == "0" {
            return None;
        }
        OperationId::from_token(&token)
    }

    pub fn is_issu(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("issu"))
    }

    /// 用例对应的插件：优先按 `operation`，否则有 `command` 时为自定义命令采集
    pub fn plugin_name(&self) -> Result<&'static str, SuiteError> {
        if let Some(operation) = self.operation.as_deref() {
            return plugin_for_operation(operation)
                .ok_or_else(|| SuiteError::UnknownOperation(operation.to_string()));
        }
        if !self.commands().is_empty() {
            return Ok(CUSTOM_COMMANDS_PLUGIN);
        }
        Err(SuiteError::UnknownOperation(
            "no operation or command specified".to_string(),
        ))
    }

    /// 为该用例构造运行上下文
    pub fn build_context(
        &self,
        tc_id: usize,
        hostname: &str,
        hops: &[String],
        log_dir: &Path,
        config: &EngineConfig,
    ) -> RunContext {
        let mut ctx = RunContext::new(hostname, log_dir).with_config(config.clone());
        ctx.host_urls = hops.to_vec();
        ctx.tc_id = Some(tc_id);
        ctx.tc_name = Some(self.name.clone());
        ctx.shell = self.shell;
        ctx.software_packages = self.packages.clone();
        ctx.package_ids = self.package_ids();
        ctx.server_repository_url = self.repository_url.clone();
        ctx.pattern = self.pattern.clone();
        ctx.next_level = self.nextlevel.clone();
        ctx.next_level_shell = self.nextlevel_shell;
        ctx.custom_commands = self.commands();
        ctx.issu_mode = self.is_issu();
        ctx.operation_id = self.operation_id();
        ctx
    }
}

/// 读取测试用例文件
pub fn load_test_cases(path: &Path) -> Result<Vec<TestCaseSpec>, SuiteError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| SuiteError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `tc_loc` 为文件时即单个套件，为目录时取其中所有 `.json` 文件
pub fn discover_suites(tc_loc: &Path) -> Result<Vec<PathBuf>, SuiteError> {
    let suites = if tc_loc.is_file() {
        vec![tc_loc.to_path_buf()]
    } else if tc_loc.is_dir() {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(tc_loc)? {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                found.push(path);
            }
        }
        found.sort();
        found
    } else {
        Vec::new()
    };

    if suites.is_empty() {
        return Err(SuiteError::NoTestCases(tc_loc.to_path_buf()));
    }
    Ok(suites)
}
