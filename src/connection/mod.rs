//! 设备连接契约
//!
//! 安装引擎只依赖这里定义的几个原语：发送命令、等待输出匹配、
//! 断开、重连和重启。具体的 telnet / ssh / 串口实现由调用方提供。

mod scripted;

pub use scripted::{ScriptedConnection, ScriptedReply, ScriptedStep, TransportEvent};

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("命令超时: `{command}` 超过 {timeout_ms}ms 未得到期望输出")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("连接错误: {0}")]
    Connection(String),

    #[error("连接已关闭")]
    Closed,

    #[error("命令语法错误: {0}")]
    CommandSyntax(String),
}

impl TransportError {
    pub fn timeout(command: &str, timeout: Duration) -> Self {
        Self::Timeout {
            command: command.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// 连接是否已经丢失（需要重连才能继续）
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed)
    }
}

/// `expect_any` 的匹配结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectMatch {
    /// 命中的模式在候选列表中的下标
    pub index: usize,
    /// 匹配位置之前的输出
    pub before: String,
    /// 被匹配到的文本
    pub matched: String,
}

impl ExpectMatch {
    /// 在文本中查找最早出现的模式；起点相同则取声明顺序靠前者
    pub fn from_text(text: &str, patterns: &[Regex]) -> Option<Self> {
        let (index, start, end) = earliest_match(text, patterns)?;
        Some(Self {
            index,
            before: text[..start].to_string(),
            matched: text[start..end].to_string(),
        })
    }

    /// 到匹配结束为止的全部输出
    pub fn full_text(&self) -> String {
        format!("{}{}", self.before, self.matched)
    }
}

/// 返回 `(模式下标, 起点, 终点)`
pub fn earliest_match(text: &str, patterns: &[Regex]) -> Option<(usize, usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None;
    for (index, pattern) in patterns.iter().enumerate() {
        let Some(found) = pattern.find(text) else {
            continue;
        };
        let earlier = match best {
            None => true,
            Some((_, start, _)) => found.start() < start,
        };
        if earlier {
            best = Some((index, found.start(), found.end()));
        }
    }
    best
}

/// 设备控制台连接
///
/// 同一时刻只有一个安装运行持有连接的可变借用，因此方法均为 `&mut self`。
#[async_trait]
pub trait Connection: Send {
    /// 设备主机名
    fn hostname(&self) -> &str;

    /// 是否通过串口控制台连接（重启期间会话保持）
    fn is_console(&self) -> bool;

    /// 发送命令并返回直到提示符为止的输出
    async fn send(&mut self, command: &str, timeout: Duration) -> Result<String, TransportError>;

    /// 发送命令并等待输出匹配 `wait_for`，超时返回 `TransportError::Timeout`
    async fn send_and_wait(
        &mut self,
        command: &str,
        wait_for: &Regex,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    /// 发送命令并等待任一候选模式出现
    async fn expect_any(
        &mut self,
        command: &str,
        patterns: &[Regex],
        timeout: Duration,
    ) -> Result<ExpectMatch, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// 重新建立会话；`max_timeout` 为等待设备可达的上限
    async fn reconnect(
        &mut self,
        force_discovery: bool,
        max_timeout: Option<Duration>,
    ) -> Result<(), TransportError>;

    /// 控制台上等待设备重启完成；`no_reload_cmd` 为真时不主动下发 reload
    async fn reload(
        &mut self,
        reload_timeout: Duration,
        no_reload_cmd: bool,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<Regex> {
        list.iter().map(|p| Regex::new(p).unwrap()).collect()
    }

    #[test]
    fn test_earliest_match_prefers_position() {
        let patterns = patterns(&["aborted", "Install operation \\d+ started"]);
        let found = earliest_match("Install operation 7 started ... aborted", &patterns).unwrap();
        assert_eq!(found.0, 1);
        assert_eq!(found.1, 0);
    }

    #[test]
    fn test_earliest_match_tie_uses_declaration_order() {
        let patterns = patterns(&["Install", "Install operation"]);
        let found = earliest_match("Install operation 3", &patterns).unwrap();
        assert_eq!(found.0, 0);
    }

    #[test]
    fn test_expect_match_splits_text() {
        let patterns = patterns(&["continue in the background"]);
        let m = ExpectMatch::from_text("op 5: will continue in the background", &patterns).unwrap();
        assert_eq!(m.before, "op 5: will ");
        assert_eq!(m.matched, "continue in the background");
        assert_eq!(m.full_text(), "op 5: will continue in the background");
    }

    #[test]
    fn test_no_match() {
        let patterns = patterns(&["xyz"]);
        assert!(ExpectMatch::from_text("abc", &patterns).is_none());
    }

    #[test]
    fn test_transport_error_kinds() {
        let timeout = TransportError::timeout("show install request", Duration::from_secs(2));
        assert!(timeout.is_timeout());
        assert!(!timeout.is_connection_loss());
        assert!(TransportError::Closed.is_connection_loss());
        assert!(TransportError::Connection("reset".into()).is_connection_loss());
        assert_eq!(
            timeout,
            TransportError::Timeout {
                command: "show install request".into(),
                timeout_ms: 2000
            }
        );
    }
}
