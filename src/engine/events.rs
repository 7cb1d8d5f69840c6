//! 安装命令输出事件
//!
//! 安装命令发出后，设备输出中最早出现的事件决定后续处理。
//! 起点相同时按声明顺序取前者；提示符只在输出末尾才算匹配。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::ExpectMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallEvent {
    /// 操作转入后台执行
    ContinueInBackground,
    /// 操作将重启 SDR，需要确认
    ReloadPrompt,
    /// ISSU 操作确认
    IssuPrompt,
    /// 操作将重启 admin 平面 / 整机，需要确认
    AdminReloadPrompt,
    Aborted,
    /// 软件包已处于目标状态
    NoImpact,
    /// 已有安装操作在进行
    Busy,
    /// 上一次 SU / ISSU 尚未 commit
    IncompleteUpdate,
    /// 直接返回提示符
    Prompt,
}

static EVENT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    InstallEvent::ALL
        .iter()
        .filter_map(|event| Regex::new(event.pattern_source()).ok())
        .collect()
});

impl InstallEvent {
    pub const ALL: [InstallEvent; 9] = [
        InstallEvent::ContinueInBackground,
        InstallEvent::ReloadPrompt,
        InstallEvent::IssuPrompt,
        InstallEvent::AdminReloadPrompt,
        InstallEvent::Aborted,
        InstallEvent::NoImpact,
        InstallEvent::Busy,
        InstallEvent::IncompleteUpdate,
        InstallEvent::Prompt,
    ];

    pub fn pattern_source(self) -> &'static str {
        match self {
            InstallEvent::ContinueInBackground => {
                r"Install operation will continue in the background"
            }
            InstallEvent::ReloadPrompt => {
                r"This install operation will (?:reboot|reload) the sdr, continue"
            }
            InstallEvent::IssuPrompt => r"This install operation will start (?:the )?ISSU",
            InstallEvent::AdminReloadPrompt => {
                r"This install operation will (?:reboot|reload) the (?:system|host|admin plane)"
            }
            InstallEvent::Aborted => r"aborted",
            InstallEvent::NoImpact => r"NO IMPACT OPERATION",
            InstallEvent::Busy => r"Could not start this install operation",
            InstallEvent::IncompleteUpdate => {
                r"ERROR! there was an SU/ISSU done\. please perform install commit before proceeding"
            }
            InstallEvent::Prompt => r"[\w/:.\-]+(?:\([^()]*\))?#\s*\z",
        }
    }

    /// 按声明顺序排列的候选模式
    pub fn patterns() -> &'static [Regex] {
        &EVENT_PATTERNS
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// 对一段完整输出分类
    pub fn classify(text: &str) -> Option<(InstallEvent, ExpectMatch)> {
        let matched = ExpectMatch::from_text(text, Self::patterns())?;
        let event = Self::from_index(matched.index)?;
        Some((event, matched))
    }

    /// 文本中任意位置出现该事件
    pub fn is_present_in(self, text: &str) -> bool {
        Self::ALL
            .iter()
            .position(|event| *event == self)
            .and_then(|index| Self::patterns().get(index))
            .map_or(false, |re| re.is_match(text))
    }

    /// 是否需要回答确认提示
    pub fn needs_confirmation(self) -> bool {
        matches!(
            self,
            InstallEvent::ReloadPrompt | InstallEvent::IssuPrompt | InstallEvent::AdminReloadPrompt
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            InstallEvent::ContinueInBackground => "continue_in_background",
            InstallEvent::ReloadPrompt => "reload_prompt",
            InstallEvent::IssuPrompt => "issu_prompt",
            InstallEvent::AdminReloadPrompt => "admin_reload_prompt",
            InstallEvent::Aborted => "aborted",
            InstallEvent::NoImpact => "no_impact",
            InstallEvent::Busy => "busy",
            InstallEvent::IncompleteUpdate => "incomplete_update",
            InstallEvent::Prompt => "prompt",
        }
    }
}
