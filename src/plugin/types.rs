//! 插件系统类型定义
//!
//! 定义 InstallPlugin trait、PluginDescriptor、Phase 等核心类型

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::connection::Connection;
use crate::context::RunContext;
use crate::engine::InstallError;

/// 插件错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("插件已注册: {0}")]
    AlreadyRegistered(String),

    #[error("插件不存在: {0}")]
    NotFound(String),

    #[error("插件描述无效: {0}")]
    InvalidDescriptor(String),
}

/// 安装阶段
///
/// 声明顺序即标准执行顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "Pre-Upgrade")]
    PreUpgrade,
    Add,
    /// prepare / extract / prepare clean
    #[serde(rename = "Pre-Activate", alias = "Prepare")]
    Prepare,
    Activate,
    Commit,
    Deactivate,
    Remove,
    #[serde(rename = "Remove All Inactive")]
    RemoveAllInactive,
    #[serde(rename = "Post-Upgrade")]
    PostUpgrade,
    #[serde(rename = "Migration-Audit")]
    MigrationAudit,
    #[serde(rename = "Pre-Migrate")]
    PreMigrate,
    Migrate,
    #[serde(rename = "Post-Migrate")]
    PostMigrate,
}

impl Phase {
    pub const ALL: [Phase; 13] = [
        Phase::PreUpgrade,
        Phase::Add,
        Phase::Prepare,
        Phase::Activate,
        Phase::Commit,
        Phase::Deactivate,
        Phase::Remove,
        Phase::RemoveAllInactive,
        Phase::PostUpgrade,
        Phase::MigrationAudit,
        Phase::PreMigrate,
        Phase::Migrate,
        Phase::PostMigrate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreUpgrade => "Pre-Upgrade",
            Phase::Add => "Add",
            Phase::Prepare => "Pre-Activate",
            Phase::Activate => "Activate",
            Phase::Commit => "Commit",
            Phase::Deactivate => "Deactivate",
            Phase::Remove => "Remove",
            Phase::RemoveAllInactive => "Remove All Inactive",
            Phase::PostUpgrade => "Post-Upgrade",
            Phase::MigrationAudit => "Migration-Audit",
            Phase::PreMigrate => "Pre-Migrate",
            Phase::Migrate => "Migrate",
            Phase::PostMigrate => "Post-Migrate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        if wanted.eq_ignore_ascii_case("prepare") {
            return Ok(Phase::Prepare);
        }
        Phase::ALL
            .iter()
            .copied()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let supported: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();
                PluginError::InvalidDescriptor(format!(
                    "未知阶段 {wanted}，支持的阶段: {}",
                    supported.join(", ")
                ))
            })
    }
}

/// 插件能力描述
///
/// 任一集合为空表示该维度不限制。注册后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub platforms: BTreeSet<String>,
    #[serde(default)]
    pub phases: BTreeSet<Phase>,
    #[serde(default)]
    pub os: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            platforms: BTreeSet::new(),
            phases: BTreeSet::new(),
            os: BTreeSet::new(),
            description: String::new(),
        }
    }

    pub fn with_platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms.extend(platforms.into_iter().map(Into::into));
        self
    }

    pub fn with_phases<I>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = Phase>,
    {
        self.phases.extend(phases);
        self
    }

    pub fn with_os<I, S>(mut self, os: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.os.extend(os.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::InvalidDescriptor("插件名称不能为空".to_string()));
        }
        Ok(())
    }

    pub fn supports_platform(&self, platform: &str) -> bool {
        self.platforms.is_empty() || self.platforms.contains(platform)
    }

    pub fn supports_phase(&self, phase: Phase) -> bool {
        self.phases.is_empty() || self.phases.contains(&phase)
    }

    pub fn supports_os(&self, os: &str) -> bool {
        self.os.is_empty() || self.os.contains(os)
    }

    /// 用于排序的最早阶段，不限阶段的插件排在最后
    pub fn earliest_phase(&self) -> Option<Phase> {
        self.phases.iter().next().copied()
    }
}

/// 插件执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginRunResult {
    pub plugin_name: String,
    pub phase: Option<Phase>,
    pub success: bool,
    /// 错误信息 (如果失败)
    pub error: Option<String>,
    /// 执行时间 (毫秒)
    pub duration_ms: u64,
}

impl PluginRunResult {
    pub fn success(plugin_name: impl Into<String>, phase: Option<Phase>, duration_ms: u64) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            phase,
            success: true,
            error: None,
            duration_ms,
        }
    }

    pub fn failure(
        plugin_name: impl Into<String>,
        phase: Option<Phase>,
        error: String,
        duration_ms: u64,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            phase,
            success: false,
            error: Some(error),
            duration_ms,
        }
    }
}

/// 插件选择条件，各条件之间为与关系
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginFilter {
    pub platform: Option<String>,
    pub phase: Option<Phase>,
    pub os: Option<String>,
    pub name: Option<String>,
}

impl PluginFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 以运行上下文中的平台和系统类型构造条件
    pub fn for_context(ctx: &RunContext) -> Self {
        Self {
            platform: ctx.family.clone(),
            phase: ctx.requested_phase,
            os: ctx.os_type.clone(),
            name: None,
        }
    }

    pub fn matches(&self, descriptor: &PluginDescriptor) -> bool {
        self.platform
            .as_deref()
            .map_or(true, |p| descriptor.supports_platform(p))
            && self.phase.map_or(true, |p| descriptor.supports_phase(p))
            && self.os.as_deref().map_or(true, |o| descriptor.supports_os(o))
            && self.name.as_deref().map_or(true, |n| descriptor.name == n)
    }
}

/// 安装插件
///
/// 每个插件只有一个入口，返回 `Ok(false)` 表示执行完毕但结果为失败
#[async_trait]
pub trait InstallPlugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    async fn run(
        &self,
        ctx: &mut RunContext,
        conn: &mut dyn Connection,
    ) -> Result<bool, InstallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serde_names() {
        let phase: Phase = serde_json::from_str("\"Pre-Activate\"").unwrap();
        assert_eq!(phase, Phase::Prepare);
        let phase: Phase = serde_json::from_str("\"Prepare\"").unwrap();
        assert_eq!(phase, Phase::Prepare);
        assert_eq!(
            serde_json::to_string(&Phase::PostMigrate).unwrap(),
            "\"Post-Migrate\""
        );
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("commit".parse::<Phase>().unwrap(), Phase::Commit);
        assert_eq!("Remove All Inactive".parse::<Phase>().unwrap(), Phase::RemoveAllInactive);
        assert!("Upgrade".parse::<Phase>().is_err());
    }

    #[test]
    fn test_phase_order_is_canonical() {
        assert!(Phase::Add < Phase::Prepare);
        assert!(Phase::Prepare < Phase::Activate);
        assert!(Phase::Activate < Phase::Commit);
        assert!(Phase::Migrate < Phase::PostMigrate);
    }

    #[test]
    fn test_descriptor_wildcards() {
        let descriptor = PluginDescriptor::new("Capture")
            .with_phases([Phase::PreUpgrade, Phase::PostUpgrade]);
        assert!(descriptor.supports_platform("ASR9K"));
        assert!(descriptor.supports_os("eXR"));
        assert!(descriptor.supports_phase(Phase::PostUpgrade));
        assert!(!descriptor.supports_phase(Phase::Commit));
        assert_eq!(descriptor.earliest_phase(), Some(Phase::PreUpgrade));
    }

    #[test]
    fn test_filter_and_semantics() {
        let descriptor = PluginDescriptor::new("Install Commit Plugin")
            .with_platforms(["NCS5500"])
            .with_phases([Phase::Commit])
            .with_os(["eXR"]);

        assert!(PluginFilter::new().matches(&descriptor));
        assert!(PluginFilter::new()
            .platform("NCS5500")
            .phase(Phase::Commit)
            .os("eXR")
            .matches(&descriptor));
        assert!(!PluginFilter::new()
            .platform("NCS5500")
            .phase(Phase::Add)
            .matches(&descriptor));
        assert!(!PluginFilter::new().name("Install Add Plugin").matches(&descriptor));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(PluginDescriptor::new(" ").validate().is_err());
    }
}
